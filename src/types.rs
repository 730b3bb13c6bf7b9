use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// The closed set of scans the backend knows how to run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    PortScan,
    VulnerabilityScan,
    NetworkScan,
    SnmpScan,
}

impl ScanType {
    pub const ALL: [ScanType; 4] = [
        ScanType::PortScan,
        ScanType::VulnerabilityScan,
        ScanType::NetworkScan,
        ScanType::SnmpScan,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScanType::PortScan => "port_scan",
            ScanType::VulnerabilityScan => "vulnerability_scan",
            ScanType::NetworkScan => "network_scan",
            ScanType::SnmpScan => "snmp_scan",
        }
    }

    /// Human label used in activity messages and tables.
    pub fn label(self) -> &'static str {
        match self {
            ScanType::PortScan => "Port Scan",
            ScanType::VulnerabilityScan => "Vulnerability Scan",
            ScanType::NetworkScan => "Network Scan",
            ScanType::SnmpScan => "SNMP Scan",
        }
    }

    /// Whether a `ports` list is meaningful for this scan type.
    pub fn accepts_ports(self) -> bool {
        !matches!(self, ScanType::SnmpScan)
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| {
                format!(
                    "unknown scan type '{s}' (expected one of: port_scan, vulnerability_scan, network_scan, snmp_scan)"
                )
            })
    }
}

/// Lifecycle status of a scan session. `Completed` and `Error` are terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Running,
    Completed,
    Error,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ScanStatus::Running)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One operator-initiated scan, from start to terminal state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanSession {
    pub id: String,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<String>,
    pub status: ScanStatus,
    pub progress: u8,
    /// Work-unit counters reported alongside progress (`current/total`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<ResultDocument>,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
}

impl ScanSession {
    pub fn summary(&self) -> HistoryEntry {
        HistoryEntry {
            id: self.id.clone(),
            scan_type: self.scan_type,
            target: self.target.clone(),
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Durable summary of a session kept in the bounded history log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub target: String,
    pub status: ScanStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
}

/// Port number → port record, as reported by the backend.
pub type PortMap = BTreeMap<u16, PortInfo>;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub protocol: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::service")]
    pub service: Option<ServiceInfo>,
}

impl PortInfo {
    pub fn is_open(&self) -> bool {
        self.status.as_deref() == Some("open")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub product: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" | "informational" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Vulnerability {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub name: Option<String>,
    /// `None` when the backend sent no severity or one outside the known set.
    #[serde(default, deserialize_with = "lenient::severity")]
    pub severity: Option<Severity>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub solution: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Host {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub ip: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub mac: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub vendor: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::map_or_empty")]
    pub ports: PortMap,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub error: Option<String>,
}

impl Host {
    pub fn open_ports(&self) -> usize {
        self.ports.values().filter(|p| p.is_open()).count()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SnmpInterface {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub description: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient::opt_string")]
    pub if_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub phys_address: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub speed: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub mtu: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub oper_status: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub admin_status: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PortResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortMap>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct VulnerabilityResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerabilities: Option<Vec<Vulnerability>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<Host>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SnmpResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_strings: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_info: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<BTreeMap<String, SnmpInterface>>,
}

/// Accumulated findings of a session, one shape per scan type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultDocument {
    PortScan(PortResults),
    VulnerabilityScan(VulnerabilityResults),
    NetworkScan(NetworkResults),
    SnmpScan(SnmpResults),
}

impl ResultDocument {
    pub fn empty(scan_type: ScanType) -> Self {
        match scan_type {
            ScanType::PortScan => ResultDocument::PortScan(PortResults::default()),
            ScanType::VulnerabilityScan => {
                ResultDocument::VulnerabilityScan(VulnerabilityResults::default())
            }
            ScanType::NetworkScan => ResultDocument::NetworkScan(NetworkResults::default()),
            ScanType::SnmpScan => ResultDocument::SnmpScan(SnmpResults::default()),
        }
    }

    pub fn scan_type(&self) -> ScanType {
        match self {
            ResultDocument::PortScan(_) => ScanType::PortScan,
            ResultDocument::VulnerabilityScan(_) => ScanType::VulnerabilityScan,
            ResultDocument::NetworkScan(_) => ScanType::NetworkScan,
            ResultDocument::SnmpScan(_) => ScanType::SnmpScan,
        }
    }

    /// Ports of a single-target document; network scans keep ports per host.
    pub fn ports(&self) -> Option<&PortMap> {
        match self {
            ResultDocument::PortScan(r) => r.ports.as_ref(),
            ResultDocument::VulnerabilityScan(r) => r.ports.as_ref(),
            ResultDocument::NetworkScan(_) | ResultDocument::SnmpScan(_) => None,
        }
    }

    pub fn hosts(&self) -> Option<&[Host]> {
        match self {
            ResultDocument::NetworkScan(r) => r.hosts.as_deref(),
            _ => None,
        }
    }

    pub fn vulnerabilities(&self) -> Option<&[Vulnerability]> {
        match self {
            ResultDocument::VulnerabilityScan(r) => r.vulnerabilities.as_deref(),
            _ => None,
        }
    }
}

/// A (possibly partial) result payload as it arrives on the wire.
///
/// The backend sends cumulative snapshots; every key it carries replaces the
/// stored value wholesale. Keys the payload omits stay `None`.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPatch {
    #[serde(default, deserialize_with = "lenient::opt_map")]
    pub ports: Option<PortMap>,
    #[serde(default, deserialize_with = "lenient::opt_list")]
    pub hosts: Option<Vec<Host>>,
    #[serde(default, deserialize_with = "lenient::opt_list")]
    pub vulnerabilities: Option<Vec<Vulnerability>>,
    #[serde(default, deserialize_with = "lenient::opt_string_map")]
    pub community_strings: Option<BTreeMap<String, String>>,
    #[serde(default, deserialize_with = "lenient::opt_string_map")]
    pub system_info: Option<BTreeMap<String, String>>,
    #[serde(default, deserialize_with = "lenient::opt_map")]
    pub interfaces: Option<BTreeMap<String, SnmpInterface>>,
}

/// Parse a progress value the way the backend's clients always have: numbers
/// are truncated, strings contribute their leading integer, anything else is 0.
/// The result is clamped into `0..=100`.
pub fn parse_progress(value: &Value) -> u8 {
    let raw: i64 = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => leading_integer(s).unwrap_or(0),
        _ => 0,
    };
    raw.clamp(0, 100) as u8
}

fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    // Saturate instead of failing on absurdly long digit runs; clamped later.
    let n = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(sign * n)
}

/// Deserializers that accept the loosely typed values the backend emits.
pub(crate) mod lenient {
    use super::*;

    fn scalar_to_string(v: Value) -> Option<String> {
        match v {
            Value::Null => None,
            Value::String(s) => Some(s),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            other => Some(other.to_string()),
        }
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<Value>::deserialize(d)?.and_then(scalar_to_string))
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            _ => None,
        })
    }

    pub fn severity<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Severity>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::String(s)) => Severity::parse(&s),
            _ => None,
        })
    }

    pub fn service<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ServiceInfo>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::String(name)) => Some(ServiceInfo {
                name: Some(name),
                ..ServiceInfo::default()
            }),
            Some(v @ Value::Object(_)) => {
                Some(serde_json::from_value(v).map_err(serde::de::Error::custom)?)
            }
            _ => None,
        })
    }

    /// Map whose `null` values are dropped. A `null` map is `None`.
    pub fn opt_map<'de, D, K, V>(d: D) -> Result<Option<BTreeMap<K, V>>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
    {
        Ok(Option::<BTreeMap<K, Option<V>>>::deserialize(d)?.map(|m| {
            m.into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect()
        }))
    }

    pub fn map_or_empty<'de, D, K, V>(d: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
    {
        Ok(opt_map(d)?.unwrap_or_default())
    }

    /// List whose `null` items are dropped. A `null` list is `None`.
    pub fn opt_list<'de, D, T>(d: D) -> Result<Option<Vec<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(Option::<Vec<Option<T>>>::deserialize(d)?.map(|v| v.into_iter().flatten().collect()))
    }

    /// Result payload of a lifecycle event. A payload that does not decode is
    /// logged and dropped so the event itself still applies.
    pub fn result_patch<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ResultPatch>, D::Error> {
        let Some(raw) = Option::<Value>::deserialize(d)? else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(patch) => Ok(Some(patch)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable result payload");
                Ok(None)
            }
        }
    }

    pub fn opt_string_map<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<BTreeMap<String, String>>, D::Error> {
        Ok(
            Option::<BTreeMap<String, Value>>::deserialize(d)?.map(|m| {
                m.into_iter()
                    .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k, v)))
                    .collect()
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_parsing_matches_backend_conventions() {
        assert_eq!(parse_progress(&json!(42)), 42);
        assert_eq!(parse_progress(&json!(42.9)), 42);
        assert_eq!(parse_progress(&json!("37%")), 37);
        assert_eq!(parse_progress(&json!("abc")), 0);
        assert_eq!(parse_progress(&Value::Null), 0);
        assert_eq!(parse_progress(&json!(250)), 100);
        assert_eq!(parse_progress(&json!(-5)), 0);
    }

    #[test]
    fn patch_accepts_loose_backend_shapes() {
        let patch: ResultPatch = serde_json::from_value(json!({
            "target": "10.0.0.1",
            "scan_type": "port_scan",
            "ports": {
                "22": {"status": "open", "service": "ssh"},
                "80": {"status": "open", "protocol": "tcp",
                       "service": {"name": "http", "product": "nginx", "version": "1.25"}}
            },
            "vulnerabilities": [{"name": "weak cipher", "severity": "HIGH"},
                                {"name": "odd", "severity": "spicy"}],
            "system_info": {"sysName": "core-sw", "sysServices": 72},
            "interfaces": {"1": {"description": "eth0", "speed": "1000000000", "mtu": 1500}}
        }))
        .unwrap();

        let ports = patch.ports.unwrap();
        assert_eq!(ports[&22].service.as_ref().unwrap().name.as_deref(), Some("ssh"));
        assert_eq!(ports[&80].service.as_ref().unwrap().product.as_deref(), Some("nginx"));
        let vulns = patch.vulnerabilities.unwrap();
        assert_eq!(vulns[0].severity, Some(Severity::High));
        assert_eq!(vulns[1].severity, None);
        assert_eq!(patch.system_info.unwrap()["sysServices"], "72");
        let iface = &patch.interfaces.unwrap()["1"];
        assert_eq!(iface.speed, Some(1_000_000_000));
        assert_eq!(iface.mtu, Some(1500));
        assert!(patch.hosts.is_none());
    }

    #[test]
    fn null_records_are_dropped_not_fatal() {
        let patch: ResultPatch = serde_json::from_value(json!({
            "ports": {"22": null, "80": {"status": "open"}},
            "hosts": [{"ip": "10.0.0.2", "ports": null}, null],
            "vulnerabilities": [null],
            "interfaces": {"1": null}
        }))
        .unwrap();
        assert_eq!(patch.ports.unwrap().keys().copied().collect::<Vec<_>>(), vec![80]);
        let hosts = patch.hosts.unwrap();
        assert_eq!(hosts.len(), 1);
        assert!(hosts[0].ports.is_empty());
        assert_eq!(patch.vulnerabilities, Some(vec![]));
        assert_eq!(patch.interfaces, Some(BTreeMap::new()));
    }

    #[test]
    fn scan_type_parses_wire_names() {
        assert_eq!("network_scan".parse::<ScanType>(), Ok(ScanType::NetworkScan));
        assert!("ping_sweep".parse::<ScanType>().is_err());
    }
}
