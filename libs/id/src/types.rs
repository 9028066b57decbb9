//! ID definitions for the scheduled resources.

use crate::define_id;

define_id!(
    /// A physical host that runs zones.
    NodeId,
    "node"
);

define_id!(
    /// A zone: one OS-level virtual machine. Also used as its zone name.
    ZoneId,
    "zone"
);

define_id!(
    /// A service descriptor attached to a zone.
    ServiceId,
    "svc"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdError;
    use proptest::prelude::*;

    #[test]
    fn test_zone_id_roundtrip() {
        let id = ZoneId::new();
        let parsed: ZoneId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_prefixes() {
        assert!(NodeId::new().to_string().starts_with("node_"));
        assert!(ZoneId::new().to_string().starts_with("zone_"));
        assert!(ServiceId::new().to_string().starts_with("svc_"));
    }

    #[test]
    fn test_foreign_prefix_rejected() {
        let err = "node_01HV4Z2WQXKJNM8GPQY6VBKC3D"
            .parse::<ZoneId>()
            .unwrap_err();
        assert_eq!(
            err,
            IdError::InvalidPrefix {
                expected: "zone",
                actual: "node".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_ids() {
        assert_eq!("".parse::<ZoneId>().unwrap_err(), IdError::Empty);
        assert_eq!(
            "zone01HV4Z2WQXKJNM8GPQY6VBKC3D".parse::<ZoneId>().unwrap_err(),
            IdError::MissingSeparator
        );
        assert!(matches!(
            "zone_nope".parse::<ZoneId>().unwrap_err(),
            IdError::InvalidUlid(_)
        ));
    }

    #[test]
    fn test_json_is_plain_string() {
        let id: NodeId = "node_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"node_01HV4Z2WQXKJNM8GPQY6VBKC3D\"");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_ids_sort_by_creation() {
        let first = ZoneId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ZoneId::new();
        assert!(first < second);
    }

    proptest! {
        #[test]
        fn rendered_zone_ids_are_zone_name_safe(raw in any::<u128>()) {
            let id = ZoneId::from_ulid(crate::Ulid::from(raw));
            let rendered = id.to_string();
            prop_assert!(rendered.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
            prop_assert_eq!(rendered.parse::<ZoneId>().unwrap(), id);
        }
    }
}
