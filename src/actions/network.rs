use async_trait::async_trait;
use tracing::info;

use super::injector::InjectionSpec;
use super::{ActionExecutor, ExecContext, ExecutionError, ExecutorTraits};
use crate::crd::{ChaosAction, ChaosExperimentSpec, PartitionDirection};
use crate::safety::TargetRef;

/// Network tooling image carrying `tc` and `iptables`.
pub const NET_TOOLS_IMAGE: &str = "nicolaka/netshoot:v0.13";

/// iptables chain owned by network-partition; cleanup removes the chain
/// and nothing else.
pub const PARTITION_CHAIN: &str = "CHAOS_PARTITION";

/// Fixed latency injected by pod-delay.
pub const DELAY_MS: u32 = 100;

fn container_name(prefix: &str) -> String {
    format!("{prefix}-{}", chrono::Utc::now().timestamp_millis())
}

/* ============================= SCRIPTS ============================= */

pub fn delay_script(delay_ms: u32, seconds: u64) -> String {
    format!(
        "tc qdisc add dev eth0 root netem delay {delay_ms}ms && sleep {seconds}; \
         tc qdisc del dev eth0 root netem"
    )
}

pub fn loss_script(percentage: u32, seconds: u64) -> String {
    format!(
        "tc qdisc add dev eth0 root netem loss {percentage}% && sleep {seconds}; \
         tc qdisc del dev eth0 root netem"
    )
}

/// Build the partition script: create the chain, populate DROP rules,
/// hook it into INPUT/OUTPUT per direction, sleep out the fault, then
/// delete the chain.
///
/// With no targets at all, everything except loopback is dropped.
pub fn partition_script(spec: &ChaosExperimentSpec, seconds: u64) -> String {
    let direction = spec.direction.unwrap_or_default();
    let mut lines: Vec<String> = vec![format!("iptables -N {PARTITION_CHAIN}")];

    let addresses: Vec<String> = spec
        .target_ips
        .iter()
        .flatten()
        .chain(spec.target_cidrs.iter().flatten())
        .cloned()
        .collect();
    let ports: Vec<String> = spec
        .target_ports
        .iter()
        .flatten()
        .map(|p| p.replace('-', ":"))
        .collect();
    let protocols: Vec<String> = match &spec.target_protocols {
        Some(p) if !p.is_empty() => p.clone(),
        // --dport needs an explicit protocol
        _ if !ports.is_empty() => vec!["tcp".into(), "udp".into()],
        _ => Vec::new(),
    };

    if addresses.is_empty() && ports.is_empty() && protocols.is_empty() {
        // Total partition, loopback excepted.
        lines.push(format!("iptables -A {PARTITION_CHAIN} -s 127.0.0.0/8 -j RETURN"));
        lines.push(format!("iptables -A {PARTITION_CHAIN} -d 127.0.0.0/8 -j RETURN"));
        lines.push(format!("iptables -A {PARTITION_CHAIN} -j DROP"));
    } else {
        let address_matchers: Vec<Option<(&str, &str)>> = if addresses.is_empty() {
            vec![None]
        } else {
            // A chain hooked into INPUT matches on source, into OUTPUT on
            // destination; non-matching rules in the other hook are inert.
            addresses
                .iter()
                .flat_map(|a| [Some(("-s", a.as_str())), Some(("-d", a.as_str()))])
                .collect()
        };

        for matcher in address_matchers {
            let addr_part = matcher
                .map(|(flag, addr)| format!(" {flag} {addr}"))
                .unwrap_or_default();
            if protocols.is_empty() {
                lines.push(format!("iptables -A {PARTITION_CHAIN}{addr_part} -j DROP"));
                continue;
            }
            for proto in &protocols {
                if ports.is_empty() || proto == "icmp" {
                    lines.push(format!(
                        "iptables -A {PARTITION_CHAIN}{addr_part} -p {proto} -j DROP"
                    ));
                } else {
                    for port in &ports {
                        lines.push(format!(
                            "iptables -A {PARTITION_CHAIN}{addr_part} -p {proto} --dport {port} -j DROP"
                        ));
                    }
                }
            }
        }
    }

    if matches!(direction, PartitionDirection::Ingress | PartitionDirection::Both) {
        lines.push(format!("iptables -I INPUT -j {PARTITION_CHAIN}"));
    }
    if matches!(direction, PartitionDirection::Egress | PartitionDirection::Both) {
        lines.push(format!("iptables -I OUTPUT -j {PARTITION_CHAIN}"));
    }

    lines.push(format!("sleep {seconds}"));
    lines.push(partition_cleanup_script());
    lines.join(" && ")
}

/// Unhook, flush and delete the partition chain; tolerant of partial state
/// so the finalizer can run it on any target.
pub fn partition_cleanup_script() -> String {
    format!(
        "iptables -D INPUT -j {PARTITION_CHAIN} 2>/dev/null; \
         iptables -D OUTPUT -j {PARTITION_CHAIN} 2>/dev/null; \
         iptables -F {PARTITION_CHAIN} 2>/dev/null; \
         iptables -X {PARTITION_CHAIN} 2>/dev/null; true"
    )
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

/* ============================= POD DELAY ============================= */

/// Injects fixed `tc netem` latency for the fault duration.
pub struct PodDelayExecutor;

#[async_trait]
impl ActionExecutor for PodDelayExecutor {
    fn action(&self) -> ChaosAction {
        ChaosAction::PodDelay
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
        if ctx.fault_duration().is_none() {
            return Err(ExecutionError::fatal("pod-delay requires a valid duration"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        let seconds = ctx.fault_duration().map(|d| d.as_secs()).unwrap_or(0);
        info!(pod = %target.name, delay_ms = DELAY_MS, seconds, "pod_delay_start");
        run_injection(
            ctx,
            target,
            InjectionSpec {
                container_name: container_name("chaos-delay"),
                image: NET_TOOLS_IMAGE.into(),
                command: vec!["sh".into(), "-c".into(), delay_script(DELAY_MS, seconds)],
                net_admin: true,
            },
        )
        .await
    }
}

/* ============================= NETWORK LOSS ============================= */

/// Drops the configured percentage of packets via `tc netem loss`.
pub struct NetworkLossExecutor;

#[async_trait]
impl ActionExecutor for NetworkLossExecutor {
    fn action(&self) -> ChaosAction {
        ChaosAction::PodNetworkLoss
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
        match (ctx.spec().loss_percentage, ctx.fault_duration()) {
            (Some(p), Some(_)) if p <= 100 => Ok(()),
            _ => Err(ExecutionError::fatal(
                "pod-network-loss requires lossPercentage (0-100) and a valid duration",
            )),
        }
    }

    async fn execute(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        let percentage = ctx.spec().loss_percentage.unwrap_or(0);
        let seconds = ctx.fault_duration().map(|d| d.as_secs()).unwrap_or(0);
        info!(pod = %target.name, percentage, seconds, "network_loss_start");
        run_injection(
            ctx,
            target,
            InjectionSpec {
                container_name: container_name("chaos-loss"),
                image: NET_TOOLS_IMAGE.into(),
                command: vec!["sh".into(), "-c".into(), loss_script(percentage, seconds)],
                net_admin: true,
            },
        )
        .await
    }
}

/* ============================= NETWORK PARTITION ============================= */

/// Drops traffic through a dedicated iptables chain, scoped by direction,
/// address, port and protocol targets.
pub struct NetworkPartitionExecutor;

#[async_trait]
impl ActionExecutor for NetworkPartitionExecutor {
    fn action(&self) -> ChaosAction {
        ChaosAction::NetworkPartition
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
        if ctx.fault_duration().is_none() {
            return Err(ExecutionError::fatal("network-partition requires a valid duration"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        let seconds = ctx.fault_duration().map(|d| d.as_secs()).unwrap_or(0);
        info!(pod = %target.name, seconds, "network_partition_start");
        run_injection(
            ctx,
            target,
            InjectionSpec {
                container_name: container_name("chaos-partition"),
                image: NET_TOOLS_IMAGE.into(),
                command: vec![
                    "sh".into(),
                    "-c".into(),
                    partition_script(ctx.spec(), seconds),
                ],
                net_admin: true,
            },
        )
        .await
    }

    async fn observe(&self, ctx: &ExecContext, target: &TargetRef) -> Result<(), ExecutionError> {
        // Finalizer path: make sure the chain is gone even if the fault
        // script was cut short.
        let handle = ctx
            .injector
            .launch(
                target,
                &InjectionSpec {
                    container_name: container_name("chaos-unpartition"),
                    image: NET_TOOLS_IMAGE.into(),
                    command: vec!["sh".into(), "-c".into(), partition_cleanup_script()],
                    net_admin: true,
                },
            )
            .await?;
        ctx.injector.wait(&handle, super::WAIT_SLACK).await
    }
}

/* ============================= TESTS ============================= */
