use async_trait::async_trait;
use tracing::info;

use super::injector::InjectionSpec;
use super::{ActionExecutor, ExecContext, ExecutionError, ExecutorTraits};
use crate::crd::ChaosAction;
use crate::safety::TargetRef;

/// stress-ng image used for CPU and memory pressure.
pub const STRESS_IMAGE: &str = "alexeiled/stress-ng:latest-ubuntu";

/// Plain busybox-class image for the disk-fill shell script.
pub const SHELL_IMAGE: &str = "alpine:3.20";

fn container_name(prefix: &str) -> String {
    format!("{prefix}-{}", chrono::Utc::now().timestamp_millis())
}

/* ============================= COMMANDS ============================= */

pub fn cpu_stress_command(workers: u32, seconds: u64) -> Vec<String> {
    vec![
        "stress-ng".into(),
        "--cpu".into(),
        workers.to_string(),
        "--timeout".into(),
        format!("{seconds}s"),
    ]
}

pub fn memory_stress_command(size: &str, seconds: u64) -> Vec<String> {
    vec![
        "stress-ng".into(),
        "--vm".into(),
        "1".into(),
        "--vm-bytes".into(),
        size.to_string(),
        "--vm-hang".into(),
        "0".into(),
        "--timeout".into(),
        format!("{seconds}s"),
    ]
}

/// Sparse-file fill: `seek` allocates the apparent size without writing
/// data blocks; the file is removed when the fault ends.
pub fn disk_fill_command(size_mb: u64, seconds: u64) -> Vec<String> {
    vec![
        "sh".into(),
        "-c".into(),
        format!(
            "dd if=/dev/zero of=/tmp/chaos-fill bs=1M count=0 seek={size_mb} && sleep {seconds}; rm -f /tmp/chaos-fill"
        ),
    ]
}

/// Convert `256M` / `2G` into megabytes.
pub fn size_to_mb(size: &str) -> Option<u64> {
    let (value, unit) = size.split_at(size.len().checked_sub(1)?);
    let value: u64 = value.parse().ok()?;
    match unit {
        "M" => Some(value),
        "G" => value.checked_mul(1024),
        _ => None,
    }
}

async fn run_injection(
    ctx: &ExecContext,
    target: &TargetRef,
    spec: InjectionSpec,
) -> Result<(), ExecutionError> {
    let handle = ctx.injector.launch(target, &spec).await?;
    ctx.injector.wait(&handle, ctx.wait_budget()).await?;
    ctx.injector.cleanup(&handle).await
}

/* ============================= CPU STRESS ============================= */

/// Runs `stress-ng` CPU workers inside an ephemeral container.
pub struct CpuStressExecutor;

#[async_trait]
impl ActionExecutor for CpuStressExecutor {
    fn action(&self) -> ChaosAction {
        ChaosAction::PodCpuStress
    }

    fn traits(&self) -> ExecutorTraits {
        ExecutorTraits {
            destructive: false,
            ephemeral_container: true,
            cluster_scoped: false,
            rbac_verbs: &["get", "list", "watch", "patch"],
        }
    }

    async fn prepare(
        &self,
        ctx: &ExecContext,
        _targets: &[TargetRef],
    ) -> Result<(), ExecutionError> {
        match (ctx.spec().cpu, ctx.fault_duration()) {
            (Some(cpu), Some(_)) if cpu > 0 => Ok(()),
            _ => Err(ExecutionError::fatal(
                "pod-cpu-stress requires cpu workers and a valid duration",
            )),
        }
    }

    async fn execute(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        let workers = ctx.spec().cpu.unwrap_or(1);
        let seconds = ctx.fault_duration().map(|d| d.as_secs()).unwrap_or(0);
        info!(pod = %target.name, workers, seconds, "cpu_stress_start");
        run_injection(
            ctx,
            target,
            InjectionSpec {
                container_name: container_name("chaos-cpu"),
                image: STRESS_IMAGE.into(),
                command: cpu_stress_command(workers, seconds),
                net_admin: false,
            },
        )
        .await
    }
}

/* ============================= MEMORY STRESS ============================= */

/// Allocates `memorySize` in a stress-ng VM worker for the fault duration.
pub struct MemoryStressExecutor;

#[async_trait]
impl ActionExecutor for MemoryStressExecutor {
    fn action(&self) -> ChaosAction {
        ChaosAction::PodMemoryStress
    }

    fn traits(&self) -> ExecutorTraits {
        ExecutorTraits {
            destructive: false,
            ephemeral_container: true,
            cluster_scoped: false,
            rbac_verbs: &["get", "list", "watch", "patch"],
        }
    }

    async fn prepare(
        &self,
        ctx: &ExecContext,
        _targets: &[TargetRef],
    ) -> Result<(), ExecutionError> {
        match (&ctx.spec().memory_size, ctx.fault_duration()) {
            (Some(_), Some(_)) => Ok(()),
            _ => Err(ExecutionError::fatal(
                "pod-memory-stress requires memorySize and a valid duration",
            )),
        }
    }

    async fn execute(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        let size = ctx
            .spec()
            .memory_size
            .clone()
            .ok_or_else(|| ExecutionError::fatal("memorySize missing"))?;
        let seconds = ctx.fault_duration().map(|d| d.as_secs()).unwrap_or(0);
        info!(pod = %target.name, size = %size, seconds, "memory_stress_start");
        run_injection(
            ctx,
            target,
            InjectionSpec {
                container_name: container_name("chaos-mem"),
                image: STRESS_IMAGE.into(),
                command: memory_stress_command(&size, seconds),
                net_admin: false,
            },
        )
        .await
    }
}

/* ============================= DISK FILL ============================= */

/// Writes a sparse file of the configured size into the pod's writable
/// filesystem, removing it when the fault ends.
pub struct DiskFillExecutor;

#[async_trait]
impl ActionExecutor for DiskFillExecutor {
    fn action(&self) -> ChaosAction {
        ChaosAction::PodDiskFill
    }

    fn traits(&self) -> ExecutorTraits {
        ExecutorTraits {
            destructive: false,
            ephemeral_container: true,
            cluster_scoped: false,
            rbac_verbs: &["get", "list", "watch", "patch"],
        }
    }

    async fn prepare(
        &self,
        ctx: &ExecContext,
        _targets: &[TargetRef],
    ) -> Result<(), ExecutionError> {
        let size_ok = ctx.spec().size.as_deref().and_then(size_to_mb).is_some();
        if size_ok && ctx.fault_duration().is_some() {
            Ok(())
        } else {
            Err(ExecutionError::fatal(
                "pod-disk-fill requires a size like \"1G\" and a valid duration",
            ))
        }
    }

    async fn execute(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        let size_mb = ctx
            .spec()
            .size
            .as_deref()
            .and_then(size_to_mb)
            .ok_or_else(|| ExecutionError::fatal("size missing or invalid"))?;
        let seconds = ctx.fault_duration().map(|d| d.as_secs()).unwrap_or(0);
        info!(pod = %target.name, size_mb, seconds, "disk_fill_start");
        run_injection(
            ctx,
            target,
            InjectionSpec {
                container_name: container_name("chaos-fill"),
                image: SHELL_IMAGE.into(),
                command: disk_fill_command(size_mb, seconds),
                net_admin: false,
            },
        )
        .await
    }
}

/* ============================= TESTS ============================= */
