//! Render dispatch: turn a result document into rows a front end can draw.
//!
//! Everything here is a pure function of its inputs. Missing values become the
//! [`UNKNOWN`] / [`NOT_AVAILABLE`] sentinels instead of empty strings.

use serde::Serialize;
use time::OffsetDateTime;

use crate::types::{
    Host, NetworkResults, PortMap, PortResults, ResultDocument, ScanType, SnmpResults,
    VulnerabilityResults,
};

pub const UNKNOWN: &str = "Unknown";
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PortRow {
    pub port: u16,
    pub protocol: String,
    pub status: String,
    pub service: String,
    pub product: String,
    pub version: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FindingRow {
    pub name: String,
    pub severity: String,
    pub description: String,
    pub solution: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct HostRow {
    pub ip: String,
    pub mac: String,
    pub vendor: String,
    pub status: String,
    pub open_ports: usize,
    pub ports: Vec<PortRow>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRow {
    pub index: String,
    pub description: String,
    pub if_type: String,
    pub phys_address: String,
    pub speed: String,
    pub mtu: String,
    pub oper_status: String,
    pub admin_status: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SnmpView {
    pub community_strings: Vec<(String, String)>,
    pub system_info: Vec<(String, String)>,
    pub interfaces: Vec<InterfaceRow>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultView {
    Empty {
        message: String,
    },
    Ports {
        rows: Vec<PortRow>,
    },
    Vulnerabilities {
        ports: Vec<PortRow>,
        findings: Vec<FindingRow>,
        /// Set when ports were scanned but nothing was found on them.
        note: Option<String>,
    },
    Network {
        hosts: Vec<HostRow>,
    },
    Snmp(SnmpView),
}

impl ResultView {
    fn empty(message: &str) -> Self {
        ResultView::Empty {
            message: message.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResultView::Empty { .. })
    }
}

/// Map a session's document to its view. A missing document, or one whose
/// shape does not match `scan_type`, renders as "no results".
pub fn render(scan_type: ScanType, doc: Option<&ResultDocument>) -> ResultView {
    let Some(doc) = doc.filter(|d| d.scan_type() == scan_type) else {
        return ResultView::empty("No results to display.");
    };
    match doc {
        ResultDocument::PortScan(r) => render_ports(r),
        ResultDocument::VulnerabilityScan(r) => render_vulnerabilities(r),
        ResultDocument::NetworkScan(r) => render_network(r),
        ResultDocument::SnmpScan(r) => render_snmp(r),
    }
}

fn render_ports(r: &PortResults) -> ResultView {
    match r.ports.as_ref().filter(|p| !p.is_empty()) {
        Some(ports) => ResultView::Ports {
            rows: port_rows(ports),
        },
        None => ResultView::empty("No open ports found."),
    }
}

fn render_vulnerabilities(r: &VulnerabilityResults) -> ResultView {
    let ports = r.ports.as_ref().map(port_rows).unwrap_or_default();
    let findings: Vec<FindingRow> = r
        .vulnerabilities
        .iter()
        .flatten()
        .map(|v| FindingRow {
            name: or_sentinel(v.name.as_deref(), "Unnamed Vulnerability"),
            severity: v
                .severity
                .map(|s| s.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            description: or_sentinel(v.description.as_deref(), "No description available."),
            solution: v.solution.clone().filter(|s| !s.trim().is_empty()),
        })
        .collect();

    if ports.is_empty() && findings.is_empty() {
        return ResultView::empty("No vulnerabilities found.");
    }
    let note = (findings.is_empty())
        .then(|| "No vulnerabilities found on the scanned ports.".to_string());
    ResultView::Vulnerabilities {
        ports,
        findings,
        note,
    }
}

fn render_network(r: &NetworkResults) -> ResultView {
    match r.hosts.as_ref().filter(|h| !h.is_empty()) {
        Some(hosts) => ResultView::Network {
            hosts: hosts.iter().map(host_row).collect(),
        },
        None => ResultView::empty("No hosts found."),
    }
}

fn render_snmp(r: &SnmpResults) -> ResultView {
    let community_strings: Vec<(String, String)> = r
        .community_strings
        .iter()
        .flatten()
        .map(|(c, banner)| (c.clone(), or_sentinel(Some(banner), NOT_AVAILABLE)))
        .collect();
    let system_info: Vec<(String, String)> = r
        .system_info
        .iter()
        .flatten()
        .map(|(k, v)| (format_key(k), or_sentinel(Some(v), NOT_AVAILABLE)))
        .collect();
    let interfaces: Vec<InterfaceRow> = r
        .interfaces
        .iter()
        .flatten()
        .map(|(idx, i)| InterfaceRow {
            index: idx.clone(),
            description: i
                .description
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| format!("Interface {idx}")),
            if_type: or_sentinel(i.if_type.as_deref(), UNKNOWN),
            phys_address: or_sentinel(i.phys_address.as_deref(), NOT_AVAILABLE),
            speed: i
                .speed
                .map(format_speed)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            mtu: i
                .mtu
                .map(|m| m.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            oper_status: or_sentinel(i.oper_status.as_deref(), "unknown"),
            admin_status: or_sentinel(i.admin_status.as_deref(), "unknown"),
        })
        .collect();

    if community_strings.is_empty() && system_info.is_empty() && interfaces.is_empty() {
        return ResultView::empty("No SNMP information available.");
    }
    ResultView::Snmp(SnmpView {
        community_strings,
        system_info,
        interfaces,
    })
}

fn port_rows(ports: &PortMap) -> Vec<PortRow> {
    ports
        .iter()
        .map(|(port, info)| {
            let service = info.service.clone().unwrap_or_default();
            PortRow {
                port: *port,
                protocol: or_sentinel(info.protocol.as_deref(), "tcp"),
                status: or_sentinel(info.status.as_deref(), UNKNOWN),
                service: or_sentinel(service.name.as_deref(), UNKNOWN),
                product: or_sentinel(service.product.as_deref(), "Unknown service"),
                version: or_sentinel(service.version.as_deref(), NOT_AVAILABLE),
            }
        })
        .collect()
}

fn host_row(h: &Host) -> HostRow {
    HostRow {
        ip: or_sentinel(h.ip.as_deref(), UNKNOWN),
        mac: or_sentinel(h.mac.as_deref(), NOT_AVAILABLE),
        vendor: or_sentinel(h.vendor.as_deref(), UNKNOWN),
        status: or_sentinel(h.status.as_deref(), "unknown"),
        open_ports: h.open_ports(),
        ports: port_rows(&h.ports)
            .into_iter()
            .filter(|p| p.status == "open")
            .collect(),
    }
}

fn or_sentinel(v: Option<&str>, sentinel: &str) -> String {
    match v.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => sentinel.to_string(),
    }
}

/// `sysDescr` → `Sys Descr`, `oper_status` → `Oper status`.
pub fn format_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        match c {
            '_' => out.push(' '),
            c if c.is_ascii_uppercase() => {
                out.push(' ');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    let mut chars = out.trim_start().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Interface speed in bits per second, scaled with one decimal.
pub fn format_speed(bps: u64) -> String {
    const UNITS: [(u64, &str); 3] = [(1_000_000_000, "Gbps"), (1_000_000, "Mbps"), (1_000, "Kbps")];
    for (scale, unit) in UNITS {
        if bps >= scale {
            return format!("{:.1} {unit}", bps as f64 / scale as f64);
        }
    }
    format!("{bps} bps")
}

/// Coarse relative time, e.g. "5 minutes ago" or "yesterday".
pub fn time_ago(then: OffsetDateTime, now: OffsetDateTime) -> String {
    let seconds = (now - then).whole_seconds().max(0);
    let steps: [(i64, &str, &str); 5] = [
        (31_536_000, "year", "1 year ago"),
        (2_592_000, "month", "1 month ago"),
        (86_400, "day", "yesterday"),
        (3_600, "hour", "1 hour ago"),
        (60, "minute", "1 minute ago"),
    ];
    for (unit, name, single) in steps {
        let n = seconds / unit;
        if n > 1 {
            return format!("{n} {name}s ago");
        }
        if n == 1 {
            return single.to_string();
        }
    }
    "just now".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::merge;
    use crate::types::ResultPatch;
    use serde_json::json;
    use time::Duration;

    fn doc(scan_type: ScanType, v: serde_json::Value) -> ResultDocument {
        let patch: ResultPatch = serde_json::from_value(v).unwrap();
        merge(None, patch, scan_type)
    }

    #[test]
    fn missing_or_empty_collections_render_empty() {
        assert!(render(ScanType::PortScan, None).is_empty());
        assert!(render(ScanType::PortScan, Some(&doc(ScanType::PortScan, json!({"ports": {}})))).is_empty());
        assert!(render(ScanType::NetworkScan, Some(&doc(ScanType::NetworkScan, json!({})))).is_empty());
        assert!(render(ScanType::SnmpScan, Some(&doc(ScanType::SnmpScan, json!({"interfaces": {}})))).is_empty());
    }

    #[test]
    fn mismatched_document_renders_empty() {
        let d = doc(ScanType::PortScan, json!({"ports": {"22": {"status": "open"}}}));
        assert!(render(ScanType::NetworkScan, Some(&d)).is_empty());
    }

    #[test]
    fn port_rows_use_sentinels() {
        let d = doc(ScanType::PortScan, json!({"ports": {"8080": {"status": "open"}}}));
        let ResultView::Ports { rows } = render(ScanType::PortScan, Some(&d)) else {
            panic!("expected port rows");
        };
        assert_eq!(
            rows,
            vec![PortRow {
                port: 8080,
                protocol: "tcp".into(),
                status: "open".into(),
                service: UNKNOWN.into(),
                product: "Unknown service".into(),
                version: NOT_AVAILABLE.into(),
            }]
        );
    }

    #[test]
    fn vulnerability_view_notes_clean_ports() {
        let d = doc(
            ScanType::VulnerabilityScan,
            json!({"ports": {"443": {"status": "open"}}, "vulnerabilities": []}),
        );
        let ResultView::Vulnerabilities { ports, findings, note } =
            render(ScanType::VulnerabilityScan, Some(&d))
        else {
            panic!("expected vulnerability view");
        };
        assert_eq!(ports.len(), 1);
        assert!(findings.is_empty());
        assert!(note.is_some());
    }

    #[test]
    fn network_view_counts_open_ports() {
        let d = doc(
            ScanType::NetworkScan,
            json!({"hosts": [{"ip": "10.0.0.1", "ports": {
                "22": {"status": "open"}, "23": {"status": "closed"}, "80": {"status": "open"}}}]}),
        );
        let ResultView::Network { hosts } = render(ScanType::NetworkScan, Some(&d)) else {
            panic!("expected network view");
        };
        assert_eq!(hosts[0].open_ports, 2);
        assert_eq!(hosts[0].ports.len(), 2);
        assert_eq!(hosts[0].mac, NOT_AVAILABLE);
    }

    #[test]
    fn snmp_view_formats_values() {
        let d = doc(
            ScanType::SnmpScan,
            json!({
                "system_info": {"sysDescr": "Linux", "sysContact": ""},
                "interfaces": {"2": {"speed": 100000000, "oper_status": "up"}}
            }),
        );
        let ResultView::Snmp(view) = render(ScanType::SnmpScan, Some(&d)) else {
            panic!("expected snmp view");
        };
        assert_eq!(
            view.system_info,
            vec![
                ("Sys Contact".to_string(), NOT_AVAILABLE.to_string()),
                ("Sys Descr".to_string(), "Linux".to_string()),
            ]
        );
        let iface = &view.interfaces[0];
        assert_eq!(iface.description, "Interface 2");
        assert_eq!(iface.speed, "100.0 Mbps");
        assert_eq!(iface.admin_status, "unknown");
    }

    #[test]
    fn helpers() {
        assert_eq!(format_key("hrSystemUptime"), "Hr System Uptime");
        assert_eq!(format_key("admin_status"), "Admin status");
        assert_eq!(format_speed(999), "999 bps");
        assert_eq!(format_speed(1_500), "1.5 Kbps");
        assert_eq!(format_speed(10_000_000_000), "10.0 Gbps");

        let now = OffsetDateTime::UNIX_EPOCH + Duration::days(400);
        assert_eq!(time_ago(now, now), "just now");
        assert_eq!(time_ago(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(time_ago(now - Duration::hours(30), now), "yesterday");
        assert_eq!(time_ago(now - Duration::days(3), now), "3 days ago");
    }
}
