use crate::types::{ResultDocument, ResultPatch, ScanType};

/// Merge an incoming result payload into a session's stored document.
///
/// The backend streams cumulative snapshots, so every top-level key present in
/// `incoming` replaces the stored value wholesale; keys it omits keep their
/// previous value. Keys that do not belong to `scan_type` are ignored.
/// Applying the same payload twice yields the same document.
pub fn merge(
    existing: Option<ResultDocument>,
    incoming: ResultPatch,
    scan_type: ScanType,
) -> ResultDocument {
    let mut doc = match existing {
        Some(doc) if doc.scan_type() == scan_type => doc,
        Some(doc) => {
            tracing::warn!(
                stored = %doc.scan_type(),
                expected = %scan_type,
                "discarding result document of the wrong scan type"
            );
            ResultDocument::empty(scan_type)
        }
        None => ResultDocument::empty(scan_type),
    };

    let ResultPatch {
        ports,
        hosts,
        vulnerabilities,
        community_strings,
        system_info,
        interfaces,
    } = incoming;

    match &mut doc {
        ResultDocument::PortScan(r) => {
            replace(&mut r.ports, ports);
        }
        ResultDocument::VulnerabilityScan(r) => {
            replace(&mut r.ports, ports);
            replace(&mut r.vulnerabilities, vulnerabilities);
        }
        ResultDocument::NetworkScan(r) => {
            replace(&mut r.hosts, hosts);
        }
        ResultDocument::SnmpScan(r) => {
            replace(&mut r.community_strings, community_strings);
            replace(&mut r.system_info, system_info);
            replace(&mut r.interfaces, interfaces);
        }
    }
    doc
}

/// Last non-null wins.
fn replace<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(v: serde_json::Value) -> ResultPatch {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn present_keys_replace_and_absent_keys_survive() {
        let first = merge(
            None,
            patch(json!({
                "ports": {"22": {"status": "open"}},
                "vulnerabilities": [{"name": "a", "severity": "low"}]
            })),
            ScanType::VulnerabilityScan,
        );
        let second = merge(
            Some(first),
            patch(json!({"ports": {"80": {"status": "open"}, "443": {"status": "open"}}})),
            ScanType::VulnerabilityScan,
        );

        let ports = second.ports().unwrap();
        assert_eq!(ports.keys().copied().collect::<Vec<_>>(), vec![80, 443]);
        assert_eq!(second.vulnerabilities().unwrap().len(), 1);
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let incoming = patch(json!({
            "hosts": [{"ip": "10.0.0.1", "ports": {"22": {"status": "open"}}},
                      {"ip": "10.0.0.2"}]
        }));
        let once = merge(None, incoming.clone(), ScanType::NetworkScan);
        let twice = merge(Some(once.clone()), incoming, ScanType::NetworkScan);
        assert_eq!(once, twice);
        assert_eq!(twice.hosts().unwrap().len(), 2);
    }

    #[test]
    fn keys_foreign_to_the_scan_type_are_ignored() {
        let doc = merge(
            None,
            patch(json!({"hosts": [{"ip": "10.0.0.9"}], "ports": {"22": {}}})),
            ScanType::PortScan,
        );
        assert!(doc.hosts().is_none());
        assert_eq!(doc.ports().unwrap().len(), 1);
    }

    #[test]
    fn snmp_keys_are_replaced_individually() {
        let doc = merge(
            None,
            patch(json!({"community_strings": {"public": "Linux core-sw"}})),
            ScanType::SnmpScan,
        );
        let doc = merge(
            Some(doc),
            patch(json!({"system_info": {"sysName": "core-sw"}, "interfaces": {}})),
            ScanType::SnmpScan,
        );
        let ResultDocument::SnmpScan(snmp) = doc else {
            panic!("expected an SNMP document");
        };
        assert_eq!(snmp.community_strings.unwrap()["public"], "Linux core-sw");
        assert_eq!(snmp.system_info.unwrap()["sysName"], "core-sw");
        assert!(snmp.interfaces.unwrap().is_empty());
    }

    #[test]
    fn wrong_variant_is_reset() {
        let stale = ResultDocument::empty(ScanType::SnmpScan);
        let doc = merge(Some(stale), ResultPatch::default(), ScanType::PortScan);
        assert_eq!(doc, ResultDocument::empty(ScanType::PortScan));
    }
}
