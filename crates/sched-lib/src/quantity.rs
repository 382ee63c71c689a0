//! Unit parsing for resource quantities
//!
//! Two grammars are supported:
//! - Kubernetes quantities (`500m`, `2`, `1Gi`, `512M`, `1e3`) used for
//!   container CPU and memory requests
//! - Throughput annotations (`50M`, `2g`, `100`) where `K`, `M` and `G`
//!   are always binary multiples

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

/// Parse a throughput annotation value into bytes/sec.
///
/// Returns `None` for empty, negative, non-finite or unparsable input.
pub fn parse_throughput(raw: &str) -> Option<f64> {
    let value = raw.trim().to_ascii_uppercase();
    if value.is_empty() {
        return None;
    }

    let (number, multiplier) = match value.as_bytes()[value.len() - 1] {
        b'K' => (&value[..value.len() - 1], KIB),
        b'M' => (&value[..value.len() - 1], MIB),
        b'G' => (&value[..value.len() - 1], GIB),
        _ => (value.as_str(), 1.0),
    };

    let parsed: f64 = number.trim().parse().ok()?;
    let bytes = parsed * multiplier;
    if !bytes.is_finite() || bytes < 0.0 {
        return None;
    }
    Some(bytes)
}

/// Parse a throughput annotation, falling back to `default` when invalid
pub fn parse_throughput_or(raw: &str, default: f64) -> f64 {
    parse_throughput(raw).unwrap_or(default)
}

/// Parse a Kubernetes resource quantity into its canonical unit
/// (cores for CPU, bytes for memory).
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let suffix_start = value
        .char_indices()
        .find(|(i, c)| {
            c.is_ascii_alphabetic() && !is_exponent_marker(value, *i, *c)
        })
        .map(|(i, _)| i)
        .unwrap_or(value.len());

    let (number, suffix) = value.split_at(suffix_start);
    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => KIB,
        "Mi" => MIB,
        "Gi" => GIB,
        "Ti" => GIB * KIB,
        "Pi" => GIB * MIB,
        "Ei" => GIB * GIB,
        _ => return None,
    };

    let parsed: f64 = number.parse().ok()?;
    let result = parsed * multiplier;
    result.is_finite().then_some(result)
}

/// An `e`/`E` is an exponent marker only when digits surround it
/// (`1e3`), otherwise it is the exa suffix (`2E`).
fn is_exponent_marker(value: &str, idx: usize, c: char) -> bool {
    if c != 'e' && c != 'E' {
        return false;
    }
    let before = value[..idx].chars().last().map(|p| p.is_ascii_digit() || p == '.');
    let after = value[idx + 1..]
        .chars()
        .next()
        .map(|n| n.is_ascii_digit() || n == '-' || n == '+');
    before == Some(true) && after == Some(true)
}
