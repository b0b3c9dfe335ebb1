//! Base58Check destination strings.
//!
//! Only the two hash-based destination forms have string addresses; richer
//! address handling belongs to the wallet layer outside the core.

use crate::hashes::{PubkeyHash, ScriptHash};
use crate::standard::Destination;

/// Address version bytes per network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPrefixes {
    pub pubkey: u8,
    pub script: u8,
}

pub const MAINNET_PREFIXES: AddressPrefixes = AddressPrefixes {
    pubkey: 45,
    script: 5,
};

pub const TESTNET_PREFIXES: AddressPrefixes = AddressPrefixes {
    pubkey: 111,
    script: 196,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("base58check decoding failed")]
    Base58,

    #[error("address payload has wrong length")]
    BadLength,

    #[error("unknown address version byte {0}")]
    UnknownVersion(u8),

    #[error("destination kind has no address form")]
    NoAddressForm,
}

/// Encode a destination as a Base58Check address string.
pub fn encode_destination(
    dest: &Destination,
    prefixes: AddressPrefixes,
) -> Result<String, AddressError> {
    let (version, hash) = match dest {
        Destination::PubkeyHash(hash) => (prefixes.pubkey, hash.to_byte_array()),
        Destination::ScriptHash(hash) => (prefixes.script, hash.to_byte_array()),
        _ => return Err(AddressError::NoAddressForm),
    };
    Ok(bs58::encode(hash)
        .with_check_version(version)
        .into_string())
}

/// Decode a Base58Check address string back into a destination.
pub fn decode_destination(
    address: &str,
    prefixes: AddressPrefixes,
) -> Result<Destination, AddressError> {
    let payload = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|_| AddressError::Base58)?;
    if payload.len() != 21 {
        return Err(AddressError::BadLength);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    match payload[0] {
        v if v == prefixes.pubkey => Ok(Destination::PubkeyHash(PubkeyHash::from_byte_array(hash))),
        v if v == prefixes.script => Ok(Destination::ScriptHash(ScriptHash::from_byte_array(hash))),
        v => Err(AddressError::UnknownVersion(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_pubkey_hash() {
        let dest = Destination::PubkeyHash(PubkeyHash::from_byte_array([0x11; 20]));
        let addr = encode_destination(&dest, MAINNET_PREFIXES).unwrap();
        assert_eq!(decode_destination(&addr, MAINNET_PREFIXES).unwrap(), dest);
    }

    #[test]
    fn known_testnet_address_decodes() {
        let dest =
            decode_destination("mfe7MqgYZgBuXzrT2QTFqZwBXwRDqagHTp", TESTNET_PREFIXES).unwrap();
        assert!(matches!(dest, Destination::PubkeyHash(_)));
        let reencoded = encode_destination(&dest, TESTNET_PREFIXES).unwrap();
        assert_eq!(reencoded, "mfe7MqgYZgBuXzrT2QTFqZwBXwRDqagHTp");
    }

    #[test]
    fn wrong_network_is_rejected() {
        let dest = Destination::PubkeyHash(PubkeyHash::from_byte_array([0x22; 20]));
        let addr = encode_destination(&dest, MAINNET_PREFIXES).unwrap();
        assert!(matches!(
            decode_destination(&addr, TESTNET_PREFIXES),
            Err(AddressError::UnknownVersion(_))
        ));
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let dest = Destination::PubkeyHash(PubkeyHash::from_byte_array([0x33; 20]));
        let mut addr = encode_destination(&dest, MAINNET_PREFIXES).unwrap();
        let flipped = if addr.ends_with('1') { '2' } else { '1' };
        addr.pop();
        addr.push(flipped);
        assert_eq!(
            decode_destination(&addr, MAINNET_PREFIXES),
            Err(AddressError::Base58)
        );
    }
}
