//! MAC address table correlation.
//!
//! Bridge forwarding tables index their rows by the MAC address itself,
//! one decimal octet per OID arc. Two column walks produce the table: the
//! address column confirms which rows exist, and the port column says
//! which bridge port each row was learned on. Correlation joins the two
//! on the row suffix and groups the addresses per port.

use std::collections::{BTreeMap, HashSet};

use crate::cache::AddressTable;
use crate::oid::Oid;
use crate::value::Value;

/// Join two column walks into a per-port MAC table.
///
/// Rows whose suffix arcs do not fit in an octet are dropped, as are rows
/// that appear in only one column. A port of `0` or an empty port string
/// means the address was not learned on a physical port and is skipped.
/// When `allowed_ports` is non-empty, only the listed port strings are
/// kept.
pub fn correlate(
    address_root: &Oid,
    addresses: &[(Oid, Value)],
    port_root: &Oid,
    ports: &[(Oid, Value)],
    allowed_ports: Option<&HashSet<String>>,
    now: f64,
) -> AddressTable {
    let mut table = AddressTable {
        last_updated: now,
        ..AddressTable::default()
    };

    // Row suffix to MAC, from the address column
    let mut known = BTreeMap::new();
    for (oid, value) in addresses {
        table.raw_addresses.push((oid.clone(), value.to_cache_string()));
        if let Some(suffix) = oid.suffix_after(address_root) {
            if let Some(mac) = mac_from_arcs(suffix) {
                known.insert(suffix.to_vec(), mac);
            }
        }
    }

    let allow = allowed_ports.filter(|set| !set.is_empty());

    for (oid, value) in ports {
        let port = value.to_cache_string();
        table.raw_ports.push((oid.clone(), port.clone()));

        let Some(suffix) = oid.suffix_after(port_root) else {
            continue;
        };
        let Some(mac) = known.get(suffix) else {
            continue;
        };
        if port.is_empty() || port == "0" {
            continue;
        }
        if let Some(allow) = allow {
            if !allow.contains(&port) {
                continue;
            }
        }

        table.ports.entry(port).or_default().push(mac.clone());
    }

    table
}

/// Render OID arcs as a colon-separated lowercase MAC address.
///
/// Any arc above 255 is not an octet, so the row is not a MAC-indexed one.
fn mac_from_arcs(arcs: &[u32]) -> Option<String> {
    if arcs.is_empty() || arcs.iter().any(|&a| a > 255) {
        return None;
    }
    Some(
        arcs.iter()
            .map(|a| format!("{a:02x}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    fn address_root() -> Oid {
        oid!(1, 3, 6, 1, 2, 1, 17, 4, 3, 1, 1)
    }

    fn port_root() -> Oid {
        oid!(1, 3, 6, 1, 2, 1, 17, 4, 3, 1, 2)
    }

    fn row(root: &Oid, mac: [u32; 6]) -> Oid {
        let mut oid = root.clone();
        for arc in mac {
            oid = oid.child(arc);
        }
        oid
    }

    #[test]
    fn test_correlates_addresses_to_ports() {
        let a_root = address_root();
        let p_root = port_root();

        let addresses = vec![
            (row(&a_root, [0, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]), Value::Integer(1)),
            (row(&a_root, [0xde, 0xad, 0xbe, 0xef, 0, 1]), Value::Integer(1)),
        ];
        let ports = vec![
            (row(&p_root, [0, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]), Value::Integer(3)),
            (row(&p_root, [0xde, 0xad, 0xbe, 0xef, 0, 1]), Value::Integer(3)),
        ];

        let table = correlate(&a_root, &addresses, &p_root, &ports, None, 1000.0);

        assert_eq!(
            table.ports["3"],
            vec!["00:1a:2b:3c:4d:5e", "de:ad:be:ef:00:01"]
        );
        assert_eq!(table.last_updated, 1000.0);
        assert_eq!(table.raw_addresses.len(), 2);
        assert_eq!(table.raw_ports.len(), 2);
    }

    #[test]
    fn test_drops_rows_with_oversized_arcs() {
        let a_root = address_root();
        let p_root = port_root();

        let addresses = vec![(
            row(&a_root, [500, 1, 2, 3, 4, 5]),
            Value::Integer(1),
        )];
        let ports = vec![(row(&p_root, [500, 1, 2, 3, 4, 5]), Value::Integer(2))];

        let table = correlate(&a_root, &addresses, &p_root, &ports, None, 0.0);

        assert!(table.ports.is_empty());
        // Raw walks are kept even when correlation drops the row
        assert_eq!(table.raw_ports.len(), 1);
    }

    #[test]
    fn test_skips_unlearned_and_zero_ports() {
        let a_root = address_root();
        let p_root = port_root();

        let suffix = [1, 2, 3, 4, 5, 6];
        let addresses = vec![(row(&a_root, suffix), Value::Integer(1))];
        let ports = vec![(row(&p_root, suffix), Value::Integer(0))];

        let table = correlate(&a_root, &addresses, &p_root, &ports, None, 0.0);
        assert!(table.ports.is_empty());
    }

    #[test]
    fn test_allow_list_filters_ports() {
        let a_root = address_root();
        let p_root = port_root();

        let addresses = vec![
            (row(&a_root, [1, 1, 1, 1, 1, 1]), Value::Integer(1)),
            (row(&a_root, [2, 2, 2, 2, 2, 2]), Value::Integer(1)),
        ];
        let ports = vec![
            (row(&p_root, [1, 1, 1, 1, 1, 1]), Value::Integer(7)),
            (row(&p_root, [2, 2, 2, 2, 2, 2]), Value::Integer(9)),
        ];

        let allow: HashSet<String> = ["7".to_string()].into_iter().collect();
        let table = correlate(&a_root, &addresses, &p_root, &ports, Some(&allow), 0.0);

        assert_eq!(table.ports.len(), 1);
        assert_eq!(table.ports["7"], vec!["01:01:01:01:01:01"]);
    }

    #[test]
    fn test_rows_in_only_one_column_are_dropped() {
        let a_root = address_root();
        let p_root = port_root();

        let addresses = vec![(row(&a_root, [1, 2, 3, 4, 5, 6]), Value::Integer(1))];
        // Port column has a row the address column never confirmed
        let ports = vec![(row(&p_root, [9, 9, 9, 9, 9, 9]), Value::Integer(4))];

        let table = correlate(&a_root, &addresses, &p_root, &ports, None, 0.0);
        assert!(table.ports.is_empty());
    }
}
