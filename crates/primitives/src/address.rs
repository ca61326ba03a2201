//! Base58Check address decoding and pay-to-address script construction.

use xcoind_consensus::Network;

use crate::hash::sha256d;
use crate::script::{
    Destination, OP_CHECKSIG, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
    UnknownPrefix,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::InvalidLength => write!(f, "invalid address length"),
            AddressError::InvalidCharacter => write!(f, "invalid base58 character"),
            AddressError::InvalidChecksum => write!(f, "address checksum mismatch"),
            AddressError::UnknownPrefix => write!(f, "unknown address version byte"),
        }
    }
}

impl std::error::Error for AddressError {}

fn network_prefixes(network: Network) -> (u8, u8) {
    match network {
        Network::Mainnet => (0x00, 0x05),
        Network::Testnet | Network::Regtest => (0x6f, 0xc4),
    }
}

/// Decode an address into the destination it pays to.
pub fn address_to_destination(
    address: &str,
    network: Network,
) -> Result<Destination, AddressError> {
    let payload = base58check_decode(address)?;
    if payload.len() != 21 {
        return Err(AddressError::InvalidLength);
    }
    let (pubkey_prefix, script_prefix) = network_prefixes(network);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    if payload[0] == pubkey_prefix {
        Ok(Destination::KeyHash(hash))
    } else if payload[0] == script_prefix {
        Ok(Destination::ScriptHash(hash))
    } else {
        Err(AddressError::UnknownPrefix)
    }
}

pub fn destination_to_address(destination: &Destination, network: Network) -> String {
    let (pubkey_prefix, script_prefix) = network_prefixes(network);
    let (prefix, hash) = match destination {
        Destination::KeyHash(hash) => (pubkey_prefix, hash),
        Destination::ScriptHash(hash) => (script_prefix, hash),
    };
    let mut payload = Vec::with_capacity(21);
    payload.push(prefix);
    payload.extend_from_slice(hash);
    base58check_encode(&payload)
}

/// The canonical script_pubkey paying a destination.
pub fn destination_script(destination: &Destination) -> Vec<u8> {
    match destination {
        Destination::KeyHash(hash) => {
            let mut script = Vec::with_capacity(25);
            script.push(OP_DUP);
            script.push(OP_HASH160);
            script.push(0x14);
            script.extend_from_slice(hash);
            script.push(OP_EQUALVERIFY);
            script.push(OP_CHECKSIG);
            script
        }
        Destination::ScriptHash(hash) => {
            let mut script = Vec::with_capacity(23);
            script.push(OP_HASH160);
            script.push(0x14);
            script.extend_from_slice(hash);
            script.push(OP_EQUAL);
            script
        }
    }
}

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = base58_decode(input)?;
    if bytes.len() < 4 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    let digest = sha256d(payload);
    if checksum != &digest[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    let checksum = sha256d(payload);
    data.extend_from_slice(&checksum[..4]);
    base58_encode(&data)
}

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let mut bytes: Vec<u8> = Vec::new();
    for ch in input.bytes() {
        let value = ALPHABET
            .iter()
            .position(|entry| *entry == ch)
            .ok_or(AddressError::InvalidCharacter)? as u32;
        let mut carry = value;
        for byte in bytes.iter_mut().rev() {
            let val = (*byte as u32) * 58 + carry;
            *byte = (val & 0xff) as u8;
            carry = val >> 8;
        }
        while carry > 0 {
            bytes.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let leading_zeros = input.bytes().take_while(|b| *b == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend_from_slice(&bytes);
    Ok(out)
}

fn base58_encode(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }
    let mut digits = vec![0u8];
    for byte in data {
        let mut carry = *byte as u32;
        for digit in digits.iter_mut().rev() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 58) as u8;
            carry = value / 58;
        }
        while carry > 0 {
            digits.insert(0, (carry % 58) as u8);
            carry /= 58;
        }
    }
    let leading_zeros = data.iter().take_while(|b| **b == 0u8).count();
    let mut out = String::with_capacity(leading_zeros + digits.len());
    for _ in 0..leading_zeros {
        out.push('1');
    }
    for digit in digits {
        out.push(ALPHABET[digit as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcoind_consensus::params::initial_distribution_schedule;

    #[test]
    fn schedule_addresses_decode_as_mainnet_key_hashes() {
        for address in initial_distribution_schedule().iter().take(8) {
            let destination =
                address_to_destination(address, Network::Mainnet).expect("schedule entry");
            assert!(matches!(destination, Destination::KeyHash(_)));
        }
    }

    #[test]
    fn round_trip_through_display_form() {
        let address = initial_distribution_schedule()[0];
        let destination = address_to_destination(address, Network::Mainnet).expect("decode");
        assert_eq!(destination_to_address(&destination, Network::Mainnet), address);
    }

    #[test]
    fn testnet_rendering_differs_but_hash_matches() {
        let address = initial_distribution_schedule()[0];
        let destination = address_to_destination(address, Network::Mainnet).expect("decode");
        let testnet = destination_to_address(&destination, Network::Testnet);
        assert_ne!(testnet, address);
        let back = address_to_destination(&testnet, Network::Testnet).expect("decode");
        assert_eq!(back, destination);
    }

    #[test]
    fn wrong_network_prefix_rejected() {
        let address = initial_distribution_schedule()[0];
        assert_eq!(
            address_to_destination(address, Network::Testnet),
            Err(AddressError::UnknownPrefix)
        );
    }

    #[test]
    fn checksum_failure_detected() {
        let mut address = initial_distribution_schedule()[0].to_string();
        address.pop();
        address.push('2');
        assert!(matches!(
            address_to_destination(&address, Network::Mainnet),
            Err(AddressError::InvalidChecksum) | Err(AddressError::InvalidLength)
        ));
    }

    #[test]
    fn destination_script_shapes() {
        let key = Destination::KeyHash([1u8; 20]);
        let script = destination_script(&key);
        assert_eq!(script.len(), 25);
        assert_eq!(crate::script::extract_destination(&script), Some(key));

        let sh = Destination::ScriptHash([2u8; 20]);
        let script = destination_script(&sh);
        assert_eq!(script.len(), 23);
        assert_eq!(crate::script::extract_destination(&script), Some(sh));
    }
}
