use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::types::{HistoryEntry, ResultDocument, ScanSession, ScanType, Severity};

/// Per-type scan counts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCounts {
    pub port_scan: usize,
    pub vulnerability_scan: usize,
    pub network_scan: usize,
    pub snmp_scan: usize,
}

impl ScanCounts {
    pub fn get(&self, scan_type: ScanType) -> usize {
        match scan_type {
            ScanType::PortScan => self.port_scan,
            ScanType::VulnerabilityScan => self.vulnerability_scan,
            ScanType::NetworkScan => self.network_scan,
            ScanType::SnmpScan => self.snmp_scan,
        }
    }

    fn bump(&mut self, scan_type: ScanType) {
        let slot = match scan_type {
            ScanType::PortScan => &mut self.port_scan,
            ScanType::VulnerabilityScan => &mut self.vulnerability_scan,
            ScanType::NetworkScan => &mut self.network_scan,
            ScanType::SnmpScan => &mut self.snmp_scan,
        };
        *slot += 1;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub info: u64,
}

impl SeverityCounts {
    fn bump(&mut self, severity: Severity) {
        let slot = match severity {
            Severity::Critical => &mut self.critical,
            Severity::High => &mut self.high,
            Severity::Medium => &mut self.medium,
            Severity::Low => &mut self.low,
            Severity::Info => &mut self.info,
        };
        *slot += 1;
    }

    /// Share of critical+high findings among graded findings, as a
    /// percentage. Informational findings are not graded.
    pub fn bar_width(&self) -> f64 {
        severity_bar_width(self.critical, self.high, self.medium, self.low)
    }
}

/// `(critical + high) / (critical + high + medium + low) * 100`, or `0` when
/// nothing is graded.
pub fn severity_bar_width(critical: u64, high: u64, medium: u64, low: u64) -> f64 {
    let total = critical + high + medium + low;
    if total == 0 {
        return 0.0;
    }
    (critical + high) as f64 / total as f64 * 100.0
}

/// Dashboard figures derived from history and the in-memory sessions.
/// Always recomputed, never stored.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct DashboardStats {
    pub counts: ScanCounts,
    pub unique_hosts: usize,
    pub total_vulnerabilities: usize,
    pub severities: SeverityCounts,
    pub severity_bar_width: f64,
    pub open_ports: usize,
    pub unique_services: usize,
    pub top_port: Option<u16>,
    pub hosts_up: usize,
    pub hosts_down: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_network_scan: Option<OffsetDateTime>,
}

/// Compute dashboard figures.
///
/// Scan counts come from the bounded history log. Host, vulnerability, port and
/// service figures come from every result document still held in memory. A
/// session whose document lists no hosts counts its own target as the host.
pub fn compute<'a>(
    history: &[HistoryEntry],
    sessions: impl IntoIterator<Item = &'a ScanSession>,
) -> DashboardStats {
    let mut stats = DashboardStats::default();

    for entry in history {
        stats.counts.bump(entry.scan_type);
        if entry.scan_type == ScanType::NetworkScan {
            let seen = entry.end_time.unwrap_or(entry.start_time);
            if stats.last_network_scan.map_or(true, |t| seen > t) {
                stats.last_network_scan = Some(seen);
            }
        }
    }

    let mut hosts: HashSet<&str> = HashSet::new();
    let mut services: HashSet<&str> = HashSet::new();
    let mut port_hits: BTreeMap<u16, usize> = BTreeMap::new();
    let mut tally_ports = |ports: &'a crate::types::PortMap, open_ports: &mut usize| {
        for (port, info) in ports.iter().filter(|(_, p)| p.is_open()) {
            *open_ports += 1;
            *port_hits.entry(*port).or_default() += 1;
            if let Some(name) = info.service.as_ref().and_then(|s| s.name.as_deref()) {
                services.insert(name);
            }
        }
    };

    for session in sessions {
        let Some(doc) = session.results.as_ref() else {
            continue;
        };
        match doc.hosts() {
            Some(list) => {
                for host in list {
                    if let Some(ip) = host.ip.as_deref() {
                        hosts.insert(ip);
                    }
                    match host.status.as_deref() {
                        Some("up") => stats.hosts_up += 1,
                        Some("down") => stats.hosts_down += 1,
                        _ => {}
                    }
                    tally_ports(&host.ports, &mut stats.open_ports);
                }
            }
            None => {
                hosts.insert(session.target.as_str());
            }
        }
        if let Some(ports) = doc.ports() {
            tally_ports(ports, &mut stats.open_ports);
        }
        if let ResultDocument::VulnerabilityScan(r) = doc {
            for vuln in r.vulnerabilities.iter().flatten() {
                stats.total_vulnerabilities += 1;
                if let Some(sev) = vuln.severity {
                    stats.severities.bump(sev);
                }
            }
        }
    }

    stats.unique_hosts = hosts.len();
    stats.unique_services = services.len();
    // Most frequent open port; ties go to the lowest port number.
    stats.top_port = port_hits
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(port, _)| *port);
    stats.severity_bar_width = stats.severities.bar_width();
    stats
}

/// Period-over-period change of one figure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trend {
    /// The previous period was zero; no percentage is meaningful.
    New,
    Up(f64),
    Down(f64),
    Flat,
}

/// Compare two period values. The direction follows the exact change; the
/// percentage carried for display is rounded to one decimal.
pub fn trend(current: f64, previous: f64) -> Trend {
    if previous == 0.0 {
        return Trend::New;
    }
    let change = (current - previous) / previous * 100.0;
    let shown = (change * 10.0).round() / 10.0;
    if change > 0.0 {
        Trend::Up(shown)
    } else if change < 0.0 {
        Trend::Down(shown)
    } else {
        Trend::Flat
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::New => f.write_str("New"),
            Trend::Up(p) => write!(f, "+{p:.1}%"),
            Trend::Down(p) => write!(f, "{p:.1}%"),
            Trend::Flat => f.write_str("0%"),
        }
    }
}

impl Serialize for Trend {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// One periodic aggregate as reported by the backend.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PeriodSnapshot {
    pub network_scans: f64,
    pub vulnerability_scans: f64,
    pub total_hosts: f64,
    pub open_ports: f64,
}

/// Server-side dashboard figures (`GET /api/dashboard/stats`).
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardSnapshot {
    pub network_scans: u64,
    pub vulnerability_scans: u64,
    pub critical_vulnerabilities: u64,
    pub high_vulnerabilities: u64,
    pub medium_vulnerabilities: u64,
    pub low_vulnerabilities: u64,
    pub total_hosts: u64,
    pub hosts_up: u64,
    pub hosts_down: u64,
    pub hosts_unknown: u64,
    pub open_ports: u64,
    /// Port number or service label, whichever the backend reports.
    pub top_port: Option<Value>,
    pub unique_services: u64,
    pub last_network_scan: Option<String>,
    pub scan_history: Vec<PeriodSnapshot>,
}

impl DashboardSnapshot {
    pub fn severity_bar_width(&self) -> f64 {
        severity_bar_width(
            self.critical_vulnerabilities,
            self.high_vulnerabilities,
            self.medium_vulnerabilities,
            self.low_vulnerabilities,
        )
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Trends {
    pub network_scans: Trend,
    pub vulnerability_scans: Trend,
    pub hosts: Trend,
    pub open_ports: Trend,
}

/// Trends between the last two period snapshots, if there are two.
pub fn trends(history: &[PeriodSnapshot]) -> Option<Trends> {
    let [.., previous, current] = history else {
        return None;
    };
    Some(Trends {
        network_scans: trend(current.network_scans, previous.network_scans),
        vulnerability_scans: trend(current.vulnerability_scans, previous.vulnerability_scans),
        hosts: trend(current.total_hosts, previous.total_hosts),
        open_ports: trend(current.open_ports, previous.open_ports),
    })
}
