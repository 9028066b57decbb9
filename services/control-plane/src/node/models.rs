//! Wire types exchanged with nodes.
//!
//! Field names follow the JSON the node tooling reads and prints, which is
//! why most of them are renamed to their hyphenated forms.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// IP addressing mode every zone is provisioned with.
pub const IP_TYPE_EXCLUSIVE: &str = "exclusive";

/// Zone configuration staged on a node and fed to the zone-creation script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalZone {
    pub autoboot: String,
    pub bootargs: String,
    pub brand: String,
    #[serde(rename = "capped-cpu", skip_serializing_if = "Option::is_none")]
    pub capped_cpu: Option<CappedCpu>,
    #[serde(rename = "capped-memory", skip_serializing_if = "Option::is_none")]
    pub capped_memory: Option<CappedMemory>,
    #[serde(rename = "fs-allowed")]
    pub fs_allowed: String,
    pub hostid: String,
    #[serde(rename = "ip-type")]
    pub ip_type: String,
    pub limitpriv: String,
    pub net: Vec<ZoneNet>,
    pub pool: String,
    #[serde(rename = "scheduling-class")]
    pub scheduling_class: String,
    pub zonename: String,
    pub zonepath: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolvers: Option<Vec<String>>,
}

impl Default for PhysicalZone {
    fn default() -> Self {
        Self {
            autoboot: "false".to_string(),
            bootargs: String::new(),
            brand: String::new(),
            capped_cpu: None,
            capped_memory: None,
            fs_allowed: String::new(),
            hostid: String::new(),
            ip_type: IP_TYPE_EXCLUSIVE.to_string(),
            limitpriv: String::new(),
            net: Vec::new(),
            pool: String::new(),
            scheduling_class: String::new(),
            zonename: String::new(),
            zonepath: String::new(),
            resolvers: None,
        }
    }
}

impl PhysicalZone {
    /// The VNIC of the zone's first network entry.
    pub fn primary_vnic(&self) -> Option<&str> {
        self.net.first().map(|net| net.physical.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CappedCpu {
    pub ncpus: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CappedMemory {
    /// Size with unit suffix, e.g. `4G`.
    pub physical: String,
}

/// One network interface of a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneNet {
    #[serde(rename = "allowed-address", default, skip_serializing_if = "Option::is_none")]
    pub allowed_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defrouter: Option<String>,
    /// VNIC link name.
    pub physical: String,
}

/// A zone as reported by a node's zone listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedZone {
    /// Zone name on the node.
    pub id: String,
    pub brand: String,
    pub cpus: String,
    pub ram: String,
    /// Free-text state (`running`, `installed`, ...).
    pub state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListedZoneBody {
    brand: String,
    cpus: String,
    ram: String,
    state: Option<String>,
}

/// Decode a `{"<zonename>": {...}, ...}` listing.
pub(crate) fn parse_zone_listing(json: &str) -> Result<Vec<ListedZone>, serde_json::Error> {
    let listing: BTreeMap<String, ListedZoneBody> = serde_json::from_str(json)?;
    Ok(listing
        .into_iter()
        .map(|(id, body)| ListedZone {
            id,
            brand: body.brand,
            cpus: body.cpus,
            ram: body.ram,
            state: body.state,
        })
        .collect())
}

/// Decode a `{"<zonename>": <PhysicalZone>, ...}` dump.
pub(crate) fn parse_zone_dump(json: &str) -> Result<Vec<PhysicalZone>, serde_json::Error> {
    let dump: BTreeMap<String, PhysicalZone> = serde_json::from_str(json)?;
    Ok(dump.into_values().collect())
}

/// A virtual NIC created over a node's internal etherstub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vnic {
    /// Link name.
    pub link: String,
    /// Device the VNIC is created over.
    pub over: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> PhysicalZone {
        PhysicalZone {
            brand: "lx".to_string(),
            zonename: "zone_01HV4Z2WQXKJNM8GPQY6VBKC3D".to_string(),
            zonepath: "/zones/zone_01HV4Z2WQXKJNM8GPQY6VBKC3D".to_string(),
            capped_cpu: Some(CappedCpu { ncpus: 2 }),
            capped_memory: Some(CappedMemory {
                physical: "4G".to_string(),
            }),
            net: vec![ZoneNet {
                allowed_address: Some("10.0.0.3/24".to_string()),
                defrouter: Some("10.0.0.1".to_string()),
                physical: "abcdef0".to_string(),
            }],
            resolvers: Some(vec!["1.1.1.1".to_string()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_descriptor_uses_hyphenated_keys() {
        let json = serde_json::to_value(descriptor()).unwrap();
        assert_eq!(json["ip-type"], "exclusive");
        assert_eq!(json["capped-cpu"]["ncpus"], 2);
        assert_eq!(json["capped-memory"]["physical"], "4G");
        assert_eq!(json["net"][0]["allowed-address"], "10.0.0.3/24");
        assert_eq!(json["net"][0]["defrouter"], "10.0.0.1");
        assert_eq!(json["autoboot"], "false");
        assert_eq!(json["fs-allowed"], "");
        assert_eq!(json["scheduling-class"], "");
        assert!(json["net"].as_array().unwrap().len() == 1);
    }

    #[test]
    fn test_descriptor_tolerates_sparse_remote_output() {
        let zone: PhysicalZone = serde_json::from_str(
            r#"{"zonename":"web","zonepath":"/zones/web","brand":"lx","net":[{"physical":"abc0"}]}"#,
        )
        .unwrap();
        assert_eq!(zone.primary_vnic(), Some("abc0"));
        assert_eq!(zone.capped_cpu, None);
        assert_eq!(zone.ip_type, IP_TYPE_EXCLUSIVE);
    }

    #[test]
    fn test_parse_zone_listing() {
        let zones = parse_zone_listing(
            r#"{
                "zone_b": {"brand":"lx","cpus":"2","ram":"4G","state":"running"},
                "zone_a": {"brand":"lx","cpus":"1","ram":"1G"}
            }"#,
        )
        .unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].id, "zone_a");
        assert_eq!(zones[0].state, None);
        assert_eq!(zones[1].state.as_deref(), Some("running"));
    }

    #[test]
    fn test_parse_zone_dump() {
        let json = serde_json::json!({ "zone_a": descriptor() }).to_string();
        let zones = parse_zone_dump(&json).unwrap();
        assert_eq!(zones, vec![descriptor()]);
    }
}
