//! Recipient address normalization.

/// Domain appended to bare account numbers.
pub const CANONICAL_SUFFIX: &str = "@c.us";

/// Returns the canonical form of a recipient address.
///
/// Bare numbers get [`CANONICAL_SUFFIX`]; anything that already carries an
/// `@domain` part (individual or group) is passed through trimmed.
pub fn normalize_recipient(address: &str) -> String {
	let trimmed = address.trim();
	if trimmed.contains('@') {
		trimmed.to_string()
	} else {
		format!("{trimmed}{CANONICAL_SUFFIX}")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bare_number_gets_suffix() {
		assert_eq!(normalize_recipient("15551234567"), "15551234567@c.us");
	}

	#[test]
	fn normalization_is_transparent() {
		assert_eq!(normalize_recipient("1555"), normalize_recipient("1555@c.us"));
	}

	#[test]
	fn group_addresses_pass_through() {
		assert_eq!(normalize_recipient("12036304@g.us"), "12036304@g.us");
	}

	#[test]
	fn whitespace_is_trimmed() {
		assert_eq!(normalize_recipient("  1555 "), "1555@c.us");
	}
}
