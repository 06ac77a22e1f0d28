//! Integration tests for the accessory protocol vocabulary
//!
//! Covers:
//! - Accessory id matching and TOML overrides
//! - Identification string payloads for every index
//! - GET_PROTOCOL reply decoding edge cases

use aoap::{
    AccessoryIdentity, AccessoryIds, AccessoryRequest, AoapError, DeviceId, ProtocolVersion,
    StringIndex, UsbIds,
};

mod accessory_ids {
    use super::*;

    #[test]
    fn test_matches_ids_pair() {
        let ids = AccessoryIds::default();
        assert!(ids.matches_ids(UsbIds {
            vendor_id: 0x18d1,
            product_id: 0x2d00,
        }));
        assert!(!ids.matches_ids(UsbIds {
            vendor_id: 0x18d1,
            product_id: 0x4ee2,
        }));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let ids: AccessoryIds = toml::from_str("product_ids = [0x2d04]").unwrap();
        assert_eq!(ids.vendor_id, 0x18d1);
        assert_eq!(ids.product_ids, vec![0x2d04]);
        assert!(ids.matches(0x18d1, 0x2d04));
        assert!(!ids.matches(0x18d1, 0x2d00));
    }

    #[test]
    fn test_empty_product_list_matches_nothing() {
        let ids = AccessoryIds {
            vendor_id: 0x18d1,
            product_ids: Vec::new(),
        };
        assert!(!ids.matches(0x18d1, 0x2d00));
    }
}

mod identity {
    use super::*;

    #[test]
    fn test_every_field_is_nul_terminated() {
        let identity = AccessoryIdentity::default();
        for index in StringIndex::ALL {
            let payload = identity.encode(index).unwrap();
            assert_eq!(payload.last(), Some(&0), "field {}", index.name());
            assert_eq!(payload.len(), identity.field(index).len() + 1);
        }
    }

    #[test]
    fn test_empty_string_is_single_nul() {
        let identity = AccessoryIdentity {
            uri: String::new(),
            ..Default::default()
        };
        assert_eq!(identity.encode(StringIndex::Uri).unwrap(), vec![0]);
    }

    #[test]
    fn test_identity_from_toml() {
        let identity: AccessoryIdentity = toml::from_str(
            r#"
manufacturer = "Acme"
model = "Dash"
description = "Acme Dash"
version = "1.0"
uri = "https://example.com"
serial = "0001"
"#,
        )
        .unwrap();
        assert_eq!(identity.field(StringIndex::Manufacturer), "Acme");
        assert_eq!(identity.field(StringIndex::Serial), "0001");
    }
}

mod version {
    use super::*;

    #[test]
    fn test_short_reply() {
        assert_eq!(
            ProtocolVersion::decode(&[1]),
            Err(AoapError::ShortReply {
                expected: 2,
                actual: 1
            })
        );
        assert!(ProtocolVersion::decode(&[]).is_err());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        assert_eq!(
            ProtocolVersion::decode(&[2, 0, 0xff]).unwrap(),
            ProtocolVersion(2)
        );
    }

    #[test]
    fn test_ordering() {
        assert!(ProtocolVersion(2) > ProtocolVersion(1));
        assert_eq!(ProtocolVersion(2).to_string(), "2");
    }
}

#[test]
fn test_only_get_protocol_reads() {
    assert!(AccessoryRequest::GetProtocol.is_in());
    assert!(!AccessoryRequest::SendString.is_in());
    assert!(!AccessoryRequest::Start.is_in());
}

#[test]
fn test_device_ids_hash_distinctly() {
    use std::collections::HashSet;

    let ids: HashSet<DeviceId> = [DeviceId::new(1, 2), DeviceId::new(1, 3), DeviceId::new(1, 2)]
        .into_iter()
        .collect();
    assert_eq!(ids.len(), 2);
}
