use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::crd::{ChaosAction, ChaosExperimentSpec, TimeWindow};
use crate::schedule;
use crate::windows;

/* ============================= ERROR TYPE ============================= */

/// A single admission-time validation failure, carrying the spec field path
/// and a human-readable message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// Aggregated outcome of validating a whole experiment spec.
///
/// Errors deny admission; warnings are surfaced to the user but allow it.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError::new(field, message));
    }
}

/* ============================= PATTERNS ============================= */

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+(s|m|h))+$").expect("pattern is valid"));

static DURATION_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)(s|m|h)").expect("pattern is valid"));

static MEMORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+[MG]$").expect("pattern is valid"));

/* ============================= FIELD VALIDATORS ============================= */

/// Membership in the fixed action whitelist; used on raw string input
/// (the typed enum path never sees unknown names).
pub fn validate_action(s: &str) -> Result<ChaosAction, ValidationError> {
    ChaosAction::parse(s).ok_or_else(|| {
        ValidationError::new(
            "spec.action",
            format!(
                "unknown action {:?}; supported: {}",
                s,
                crate::crd::ALL_ACTIONS.map(|a| a.as_str()).join(", ")
            ),
        )
    })
}

/// Durations are one or more `<n><s|m|h>` components, e.g. `90s`, `1h30m`.
pub fn validate_duration(field: &str, s: &str) -> Result<(), ValidationError> {
    if DURATION_RE.is_match(s) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("invalid duration {s:?}; expected e.g. \"30s\", \"5m\", \"1h30m\""),
        ))
    }
}

/// Parse a validated duration string into a concrete duration.
///
/// Returns `None` when the string does not match the duration pattern.
pub fn parse_duration(s: &str) -> Option<std::time::Duration> {
    if !DURATION_RE.is_match(s) {
        return None;
    }
    let mut total: u64 = 0;
    for cap in DURATION_PART_RE.captures_iter(s) {
        let value: u64 = cap[1].parse().ok()?;
        let unit = match &cap[2] {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(unit)?)?;
    }
    Some(std::time::Duration::from_secs(total))
}

/// Memory and file sizes are `<n>M` or `<n>G`.
pub fn validate_memory_size(field: &str, s: &str) -> Result<(), ValidationError> {
    if MEMORY_RE.is_match(s) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("invalid size {s:?}; expected e.g. \"256M\", \"1G\""),
        ))
    }
}

pub fn validate_percentage(field: &str, n: u32) -> Result<(), ValidationError> {
    if n <= 100 {
        Ok(())
    } else {
        Err(ValidationError::new(field, format!("{n} is out of range 0-100")))
    }
}

/// Standard 5-field cron plus `@hourly`-style descriptors.
pub fn validate_schedule(s: &str) -> Result<(), ValidationError> {
    schedule::parse_cron(s)
        .map(|_| ())
        .map_err(|e| ValidationError::new("spec.schedule", e))
}

/// Enforce the Recurring/Absolute shape rules.
pub fn validate_time_window(field: &str, w: &TimeWindow) -> Result<(), ValidationError> {
    match w {
        TimeWindow::Recurring { start, end, days_of_week, timezone } => {
            let start_hm = windows::parse_hhmm(start).ok_or_else(|| {
                ValidationError::new(field, format!("invalid start time {start:?}; expected HH:MM"))
            })?;
            let end_hm = windows::parse_hhmm(end).ok_or_else(|| {
                ValidationError::new(field, format!("invalid end time {end:?}; expected HH:MM"))
            })?;
            if start_hm == end_hm {
                return Err(ValidationError::new(
                    field,
                    "start and end must differ for a recurring window",
                ));
            }
            if let Some(days) = days_of_week {
                for day in days {
                    if !windows::WEEKDAY_TOKENS.contains(&day.as_str()) {
                        return Err(ValidationError::new(
                            field,
                            format!(
                                "unknown weekday {day:?}; expected one of {}",
                                windows::WEEKDAY_TOKENS.join(", ")
                            ),
                        ));
                    }
                }
            }
            if let Some(tz) = timezone
                && tz.parse::<chrono_tz::Tz>().is_err()
            {
                return Err(ValidationError::new(
                    field,
                    format!("unknown timezone {tz:?}"),
                ));
            }
            Ok(())
        }
        TimeWindow::Absolute { start, end } => {
            let start_ts = chrono::DateTime::parse_from_rfc3339(start).map_err(|_| {
                ValidationError::new(field, format!("invalid RFC3339 start {start:?}"))
            })?;
            let end_ts = chrono::DateTime::parse_from_rfc3339(end).map_err(|_| {
                ValidationError::new(field, format!("invalid RFC3339 end {end:?}"))
            })?;
            if end_ts <= start_ts {
                return Err(ValidationError::new(field, "end must be after start"));
            }
            Ok(())
        }
    }
}

/* ============================= NETWORK TARGETS ============================= */

const PROTOCOLS: [&str; 3] = ["tcp", "udp", "icmp"];

fn validate_cidr(s: &str) -> bool {
    let Some((addr, prefix)) = s.split_once('/') else {
        return false;
    };
    let Ok(ip) = addr.parse::<IpAddr>() else {
        return false;
    };
    let Ok(bits) = prefix.parse::<u8>() else {
        return false;
    };
    match ip {
        IpAddr::V4(_) => bits <= 32,
        IpAddr::V6(_) => bits <= 128,
    }
}

fn parse_port_range(s: &str) -> Option<(u16, u16)> {
    let (lo, hi) = match s.split_once('-') {
        Some((a, b)) => (a.parse::<u16>().ok()?, b.parse::<u16>().ok()?),
        None => {
            let p = s.parse::<u16>().ok()?;
            (p, p)
        }
    };
    if lo == 0 || hi == 0 || lo > hi {
        return None;
    }
    Some((lo, hi))
}

fn port_range_covers(s: &str, port: u16) -> bool {
    parse_port_range(s).is_some_and(|(lo, hi)| lo <= port && port <= hi)
}

/// Validate network-partition targets. IP/CIDR/port/protocol syntax errors
/// reject; targets that would take out loopback, cluster DNS, or the kubelet
/// only warn.
pub fn validate_targets(spec: &ChaosExperimentSpec, report: &mut ValidationReport) {
    if let Some(ips) = &spec.target_ips {
        for ip in ips {
            match ip.parse::<IpAddr>() {
                Ok(addr) => {
                    if addr.is_loopback() {
                        report
                            .warnings
                            .push(format!("target IP {ip} is a loopback address"));
                    }
                }
                Err(_) => report.error("spec.targetIPs", format!("invalid IP address {ip:?}")),
            }
        }
    }

    if let Some(cidrs) = &spec.target_cidrs {
        for cidr in cidrs {
            if !validate_cidr(cidr) {
                report.error("spec.targetCIDRs", format!("invalid CIDR {cidr:?}"));
            } else if let Some((addr, _)) = cidr.split_once('/')
                && addr.parse::<IpAddr>().is_ok_and(|a| a.is_loopback())
            {
                report
                    .warnings
                    .push(format!("target CIDR {cidr} covers loopback"));
            }
        }
    }

    if let Some(ports) = &spec.target_ports {
        for port in ports {
            if parse_port_range(port).is_none() {
                report.error(
                    "spec.targetPorts",
                    format!("invalid port or range {port:?}; expected \"80\" or \"8000-8080\""),
                );
                continue;
            }
            if port_range_covers(port, 53) {
                report
                    .warnings
                    .push(format!("target port range {port} covers cluster DNS (53)"));
            }
            if port_range_covers(port, 10250) {
                report
                    .warnings
                    .push(format!("target port range {port} covers the kubelet (10250)"));
            }
        }
    }

    if let Some(protocols) = &spec.target_protocols {
        for proto in protocols {
            if !PROTOCOLS.contains(&proto.as_str()) {
                report.error(
                    "spec.targetProtocols",
                    format!("unknown protocol {proto:?}; expected tcp, udp or icmp"),
                );
            }
        }
    }
}

/* ============================= WHOLE-SPEC VALIDATION ============================= */

/// Validate a full experiment spec; callable from the admission webhook
/// and the reconciler alike.
pub fn validate_experiment(spec: &ChaosExperimentSpec) -> ValidationReport {
    let mut report = ValidationReport::default();

    if let Some(d) = &spec.duration
        && let Err(e) = validate_duration("spec.duration", d)
    {
        report.errors.push(e);
    }
    if let Some(d) = &spec.experiment_duration
        && let Err(e) = validate_duration("spec.experimentDuration", d)
    {
        report.errors.push(e);
    }
    if let Some(d) = &spec.retry_delay
        && let Err(e) = validate_duration("spec.retryDelay", d)
    {
        report.errors.push(e);
    }
    if let Some(s) = &spec.schedule
        && let Err(e) = validate_schedule(s)
    {
        report.errors.push(e);
    }
    if let Some(p) = spec.max_percentage
        && let Err(e) = validate_percentage("spec.maxPercentage", p)
    {
        report.errors.push(e);
    }
    if let Some(r) = spec.max_retries
        && r > 10
    {
        report.error("spec.maxRetries", format!("{r} is out of range 0-10"));
    }

    if let Some(ws) = &spec.time_windows {
        for (i, w) in ws.iter().enumerate() {
            if let Err(e) = validate_time_window(&format!("spec.timeWindows[{i}]"), w) {
                report.errors.push(e);
            }
        }
    }
    if let Some(ws) = &spec.maintenance_windows {
        for (i, w) in ws.iter().enumerate() {
            if let Err(e) = validate_time_window(&format!("spec.maintenanceWindows[{i}]"), w) {
                report.errors.push(e);
            }
        }
    }

    validate_action_params(spec, &mut report);

    if spec.action == ChaosAction::NetworkPartition {
        validate_targets(spec, &mut report);
    }

    report
}

/// Per-action required-parameter checks.
fn validate_action_params(spec: &ChaosExperimentSpec, report: &mut ValidationReport) {
    let needs_duration = matches!(
        spec.action,
        ChaosAction::PodFailure
            | ChaosAction::PodDelay
            | ChaosAction::PodCpuStress
            | ChaosAction::PodMemoryStress
            | ChaosAction::PodNetworkLoss
            | ChaosAction::PodDiskFill
            | ChaosAction::NetworkPartition
    );
    if needs_duration && spec.duration.is_none() {
        report.error(
            "spec.duration",
            format!("duration is required for action {}", spec.action),
        );
    }

    match spec.action {
        ChaosAction::PodCpuStress => {
            match spec.cpu {
                None => report.error("spec.cpu", "cpu worker count is required for pod-cpu-stress"),
                Some(0) => report.error("spec.cpu", "cpu worker count must be at least 1"),
                Some(_) => {}
            }
        }
        ChaosAction::PodMemoryStress => match &spec.memory_size {
            None => report.error(
                "spec.memorySize",
                "memorySize is required for pod-memory-stress",
            ),
            Some(m) => {
                if let Err(e) = validate_memory_size("spec.memorySize", m) {
                    report.errors.push(e);
                }
            }
        },
        ChaosAction::PodNetworkLoss => match spec.loss_percentage {
            None => report.error(
                "spec.lossPercentage",
                "lossPercentage is required for pod-network-loss",
            ),
            Some(p) => {
                if let Err(e) = validate_percentage("spec.lossPercentage", p) {
                    report.errors.push(e);
                }
            }
        },
        ChaosAction::PodDiskFill => match &spec.size {
            None => report.error("spec.size", "size is required for pod-disk-fill"),
            Some(s) => {
                if let Err(e) = validate_memory_size("spec.size", s) {
                    report.errors.push(e);
                }
            }
        },
        ChaosAction::NodeDrain => {
            if spec.drain_policy.is_none() {
                report.error("spec.drainPolicy", "drainPolicy is required for node-drain");
            }
        }
        _ => {}
    }
}

/* ============================= TESTS ============================= */
