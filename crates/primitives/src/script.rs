//! Script templates, destinations, and sigop accounting.
//!
//! The script interpreter and signature checks live outside this crate;
//! consensus code only needs to recognise the standard output templates,
//! count signature operations, and build the small scripts it emits itself
//! (coinbase height pushes, pay-to-address outputs).

use crate::hash::hash160;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Where an output pays to, for budget accounting. Pay-to-pubkey and
/// pay-to-pubkey-hash collapse onto the same key hash, mirroring the
/// address form.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Destination {
    KeyHash([u8; 20]),
    ScriptHash([u8; 20]),
}

/// Recognised standard output templates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptTemplate {
    PubKey { pubkey: Vec<u8> },
    PubKeyHash { hash: [u8; 20] },
    ScriptHash { hash: [u8; 20] },
    Multisig { required: u8, pubkeys: Vec<Vec<u8>> },
}

impl ScriptTemplate {
    /// Number of stack items a spending scriptSig is expected to push.
    pub fn script_sig_args_expected(&self) -> usize {
        match self {
            ScriptTemplate::PubKey { .. } => 1,
            ScriptTemplate::PubKeyHash { .. } => 2,
            ScriptTemplate::ScriptHash { .. } => 1,
            ScriptTemplate::Multisig { required, .. } => *required as usize + 1,
        }
    }
}

fn is_pubkey_len(len: usize) -> bool {
    len == 33 || len == 65
}

/// Classify a script_pubkey against the standard template set.
pub fn classify(script: &[u8]) -> Option<ScriptTemplate> {
    // Pay-to-pubkey-hash: DUP HASH160 <20> EQUALVERIFY CHECKSIG
    if script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        return Some(ScriptTemplate::PubKeyHash { hash });
    }

    // Pay-to-script-hash: HASH160 <20> EQUAL
    if script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[2..22]);
        return Some(ScriptTemplate::ScriptHash { hash });
    }

    // Pay-to-pubkey: <pubkey> CHECKSIG
    if script.len() >= 2 && script[script.len() - 1] == OP_CHECKSIG {
        let push_len = script[0] as usize;
        if (1..=75).contains(&push_len)
            && script.len() == push_len + 2
            && is_pubkey_len(push_len)
        {
            return Some(ScriptTemplate::PubKey {
                pubkey: script[1..1 + push_len].to_vec(),
            });
        }
    }

    // Bare multisig: OP_m <pubkeys...> OP_n CHECKMULTISIG
    if script.len() >= 3 && script[script.len() - 1] == OP_CHECKMULTISIG {
        let first = script[0];
        let last_op = script[script.len() - 2];
        if (OP_1..=OP_16).contains(&first) && (OP_1..=OP_16).contains(&last_op) {
            let required = first - OP_1 + 1;
            let total = last_op - OP_1 + 1;
            if required > total {
                return None;
            }
            let mut pubkeys = Vec::with_capacity(total as usize);
            let mut cursor = 1usize;
            while cursor < script.len() - 2 {
                let push_len = script[cursor] as usize;
                if !(1..=75).contains(&push_len) || cursor + 1 + push_len > script.len() - 2 {
                    return None;
                }
                if !is_pubkey_len(push_len) {
                    return None;
                }
                pubkeys.push(script[cursor + 1..cursor + 1 + push_len].to_vec());
                cursor += 1 + push_len;
            }
            if pubkeys.len() != total as usize {
                return None;
            }
            return Some(ScriptTemplate::Multisig { required, pubkeys });
        }
    }

    None
}

/// Standardness policy for outputs: a recognised template, with bare
/// multisig capped at 3 keys.
pub fn is_standard(script: &[u8]) -> bool {
    match classify(script) {
        Some(ScriptTemplate::Multisig { required, pubkeys }) => {
            (1..=3).contains(&(pubkeys.len() as u8)) && required >= 1
        }
        Some(_) => true,
        None => false,
    }
}

/// Budget destination for an output, when one can be named.
pub fn extract_destination(script: &[u8]) -> Option<Destination> {
    match classify(script)? {
        ScriptTemplate::PubKey { pubkey } => Some(Destination::KeyHash(hash160(&pubkey))),
        ScriptTemplate::PubKeyHash { hash } => Some(Destination::KeyHash(hash)),
        ScriptTemplate::ScriptHash { hash } => Some(Destination::ScriptHash(hash)),
        ScriptTemplate::Multisig { .. } => None,
    }
}

pub fn is_pay_to_script_hash(script: &[u8]) -> bool {
    matches!(classify(script), Some(ScriptTemplate::ScriptHash { .. }))
}

/// Walk a script collecting data pushes; `None` if any non-push opcode
/// appears or a push runs past the end.
pub fn push_only_stack(script: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut stack = Vec::new();
    let mut cursor = 0usize;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        match opcode {
            OP_0 => stack.push(Vec::new()),
            0x01..=0x4b => {
                let len = opcode as usize;
                if cursor + len > script.len() {
                    return None;
                }
                stack.push(script[cursor..cursor + len].to_vec());
                cursor += len;
            }
            OP_PUSHDATA1 => {
                let len = *script.get(cursor)? as usize;
                cursor += 1;
                if cursor + len > script.len() {
                    return None;
                }
                stack.push(script[cursor..cursor + len].to_vec());
                cursor += len;
            }
            OP_PUSHDATA2 => {
                if cursor + 2 > script.len() {
                    return None;
                }
                let len = u16::from_le_bytes([script[cursor], script[cursor + 1]]) as usize;
                cursor += 2;
                if cursor + len > script.len() {
                    return None;
                }
                stack.push(script[cursor..cursor + len].to_vec());
                cursor += len;
            }
            OP_1NEGATE => stack.push(vec![0x81]),
            OP_1..=OP_16 => stack.push(vec![opcode - OP_1 + 1]),
            _ => return None,
        }
    }
    Some(stack)
}

pub fn is_push_only(script: &[u8]) -> bool {
    push_only_stack(script).is_some()
}

/// Legacy sigop count: every CHECKMULTISIG weighs 20.
pub fn legacy_sigops(script: &[u8]) -> u32 {
    sigops(script, false)
}

/// Accurate sigop count: CHECKMULTISIG preceded by OP_n weighs n.
pub fn accurate_sigops(script: &[u8]) -> u32 {
    sigops(script, true)
}

/// Sigops contributed by redeeming a pay-to-script-hash output: the last
/// push of the scriptSig is the redeem script, counted accurately.
pub fn p2sh_sigops(script_pubkey: &[u8], script_sig: &[u8]) -> u32 {
    if !is_pay_to_script_hash(script_pubkey) {
        return legacy_sigops(script_pubkey);
    }
    match push_only_stack(script_sig) {
        Some(stack) => match stack.last() {
            Some(redeem) => accurate_sigops(redeem),
            None => 0,
        },
        None => 0,
    }
}

fn sigops(script: &[u8], accurate: bool) -> u32 {
    let mut count = 0u32;
    let mut cursor = 0usize;
    let mut last_opcode = 0xffu8;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        match opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                if accurate && (OP_1..=OP_16).contains(&last_opcode) {
                    count += (last_opcode - OP_1 + 1) as u32;
                } else {
                    count += 20;
                }
            }
            0x01..=0x4b => {
                let len = opcode as usize;
                if cursor + len > script.len() {
                    break;
                }
                cursor += len;
            }
            OP_PUSHDATA1 => {
                if cursor >= script.len() {
                    break;
                }
                let len = script[cursor] as usize;
                cursor += 1;
                if cursor + len > script.len() {
                    break;
                }
                cursor += len;
            }
            OP_PUSHDATA2 => {
                if cursor + 2 > script.len() {
                    break;
                }
                let len = u16::from_le_bytes([script[cursor], script[cursor + 1]]) as usize;
                cursor += 2;
                if cursor + len > script.len() {
                    break;
                }
                cursor += len;
            }
            OP_PUSHDATA4 => {
                if cursor + 4 > script.len() {
                    break;
                }
                let len = u32::from_le_bytes([
                    script[cursor],
                    script[cursor + 1],
                    script[cursor + 2],
                    script[cursor + 3],
                ]) as usize;
                cursor += 4;
                if cursor + len > script.len() {
                    break;
                }
                cursor += len;
            }
            _ => {}
        }
        last_opcode = opcode;
    }
    count
}

/// Append a minimal data push.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    if data.len() < OP_PUSHDATA1 as usize {
        script.push(data.len() as u8);
    } else if data.len() <= u8::MAX as usize {
        script.push(OP_PUSHDATA1);
        script.push(data.len() as u8);
    } else if data.len() <= u16::MAX as usize {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(data.len() as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(data.len() as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
}

/// Script-number encoding: little-endian magnitude with a sign bit.
pub fn script_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let mut abs = value.unsigned_abs();
    let mut result = Vec::new();
    while abs > 0 {
        result.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    let sign_bit = 0x80u8;
    if let Some(last) = result.last_mut() {
        if (*last & sign_bit) != 0 {
            result.push(if value < 0 { sign_bit } else { 0 });
        } else if value < 0 {
            *last |= sign_bit;
        }
    }
    result
}

/// `CScript() << n`: small integers use the short opcodes.
pub fn push_int(value: i64) -> Vec<u8> {
    if value == 0 {
        return vec![OP_0];
    }
    if value == -1 {
        return vec![OP_1NEGATE];
    }
    if (1..=16).contains(&value) {
        return vec![OP_1 + (value as u8 - 1)];
    }
    let data = script_num(value);
    let mut script = Vec::new();
    push_data(&mut script, &data);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p2pkh(hash: [u8; 20]) -> Vec<u8> {
        let mut script = vec![OP_DUP, OP_HASH160, 0x14];
        script.extend_from_slice(&hash);
        script.push(OP_EQUALVERIFY);
        script.push(OP_CHECKSIG);
        script
    }

    #[test]
    fn classifies_p2pkh_and_p2sh() {
        let script = p2pkh([9u8; 20]);
        assert_eq!(
            extract_destination(&script),
            Some(Destination::KeyHash([9u8; 20]))
        );
        assert!(is_standard(&script));

        let mut p2sh = vec![OP_HASH160, 0x14];
        p2sh.extend_from_slice(&[7u8; 20]);
        p2sh.push(OP_EQUAL);
        assert_eq!(
            extract_destination(&p2sh),
            Some(Destination::ScriptHash([7u8; 20]))
        );
        assert!(is_pay_to_script_hash(&p2sh));
    }

    #[test]
    fn p2pk_destination_is_key_hash() {
        let pubkey = [2u8; 33];
        let mut script = vec![0x21];
        script.extend_from_slice(&pubkey);
        script.push(OP_CHECKSIG);
        assert_eq!(
            extract_destination(&script),
            Some(Destination::KeyHash(hash160(&pubkey)))
        );
    }

    #[test]
    fn multisig_standardness_cap() {
        let key = [3u8; 33];
        let mut script = vec![OP_1];
        for _ in 0..3 {
            script.push(0x21);
            script.extend_from_slice(&key);
        }
        script.push(OP_1 + 2);
        script.push(OP_CHECKMULTISIG);
        assert!(is_standard(&script));
        assert_eq!(extract_destination(&script), None);
    }

    #[test]
    fn push_int_matches_script_forms() {
        assert_eq!(push_int(0), vec![OP_0]);
        assert_eq!(push_int(1), vec![OP_1]);
        assert_eq!(push_int(16), vec![OP_16]);
        assert_eq!(push_int(17), vec![0x01, 17]);
        assert_eq!(push_int(128), vec![0x02, 0x80, 0x00]);
        assert_eq!(push_int(486_604_799), vec![0x04, 0xff, 0xff, 0x00, 0x1d]);
    }

    #[test]
    fn sigop_weights() {
        let script = p2pkh([1u8; 20]);
        assert_eq!(legacy_sigops(&script), 1);

        let multisig = vec![OP_2, 0x21];
        let mut script = multisig;
        script.extend_from_slice(&[0u8; 33]);
        script.push(OP_1 + 1);
        script.push(OP_CHECKMULTISIG);
        assert_eq!(legacy_sigops(&script), 20);
        assert_eq!(accurate_sigops(&script), 2);
    }

    const OP_2: u8 = OP_1 + 1;

    #[test]
    fn push_only_rejects_operations() {
        assert!(is_push_only(&[0x02, 0xaa, 0xbb, OP_0]));
        assert!(!is_push_only(&[OP_DUP]));
        let stack = push_only_stack(&[0x01, 0x42, OP_1]).expect("stack");
        assert_eq!(stack, vec![vec![0x42], vec![1]]);
    }
}
