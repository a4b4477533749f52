use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

pub const LEAF_CERT: &[u8] = include_bytes!("../fixtures/leaf.example.com.der");
pub const SECOND_CERT: &[u8] = include_bytes!("../fixtures/second.example.org.der");
pub const NO_CN_CERT: &[u8] = include_bytes!("../fixtures/nocn.der");
pub const LOG_KEY: &[u8] = include_bytes!("../fixtures/log_key.der");

/// Every fifth entry carries a certificate without a common name; the rest
/// alternate between two names.
pub fn expected_name(index: u64) -> Option<&'static str> {
    match index % 5 {
        4 => None,
        n if n % 2 == 0 => Some("leaf.example.com"),
        _ => Some("second.example.org"),
    }
}

pub fn certificate_for(index: u64) -> &'static [u8] {
    match expected_name(index) {
        None => NO_CN_CERT,
        Some("leaf.example.com") => LEAF_CERT,
        Some(_) => SECOND_CERT,
    }
}

pub fn expected_names(range: std::ops::Range<u64>) -> Vec<String> {
    range
        .filter_map(expected_name)
        .map(str::to_owned)
        .collect()
}

pub fn x509_leaf(der: &[u8]) -> Vec<u8> {
    let len = (der.len() as u32).to_be_bytes();
    let mut out = vec![0, 0];
    out.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&len[1..]);
    out.extend_from_slice(der);
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn encode(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}
