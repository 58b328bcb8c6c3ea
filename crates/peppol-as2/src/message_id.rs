//! Message-ID template expansion.
//!
//! AS2 message identifiers are derived from a template with `$...$`
//! replacement tokens: `$date.<pattern>$` (a Java-style date pattern),
//! `$rand.<digits>$` (a random number with as many digits as the literal),
//! `$msg.sender.as2_id$` and `$msg.receiver.as2_id$`.

use chrono::{DateTime, Utc};
use rand::Rng;

/// The default message-ID template.
pub const DEFAULT_MESSAGE_ID_TEMPLATE: &str =
	"OpenPEPPOL-$date.ddMMyyyyHHmmssZ$-$rand.1234$@$msg.sender.as2_id$_$msg.receiver.as2_id$";

/// Expands a message-ID template. Unknown tokens are kept verbatim.
pub fn expand(
	template: &str,
	sender_as2_id: &str,
	receiver_as2_id: &str,
	now: DateTime<Utc>,
) -> String {
	let mut out = String::with_capacity(template.len());
	let mut is_token = false;
	for segment in template.split('$') {
		if is_token {
			out.push_str(&expand_token(segment, sender_as2_id, receiver_as2_id, now));
		} else {
			out.push_str(segment);
		}
		is_token = !is_token;
	}
	out
}

fn expand_token(
	token: &str,
	sender_as2_id: &str,
	receiver_as2_id: &str,
	now: DateTime<Utc>,
) -> String {
	if let Some(pattern) = token.strip_prefix("date.") {
		return now.format(&java_date_pattern_to_chrono(pattern)).to_string();
	}
	if let Some(digits) = token.strip_prefix("rand.") {
		let width = digits.len().max(1);
		let bound = 10u64.saturating_pow(width.min(18) as u32);
		let value = rand::thread_rng().gen_range(0..bound);
		return format!("{:0width$}", value, width = width);
	}
	match token {
		"msg.sender.as2_id" => sender_as2_id.to_string(),
		"msg.receiver.as2_id" => receiver_as2_id.to_string(),
		other => format!("${}$", other),
	}
}

/// Translates the Java date pattern subset used in AS2 templates to a
/// chrono format string. Unknown pattern letters are passed through.
fn java_date_pattern_to_chrono(pattern: &str) -> String {
	let mut out = String::new();
	let chars: Vec<char> = pattern.chars().collect();
	let mut i = 0;
	while i < chars.len() {
		let c = chars[i];
		let mut run = 1;
		while i + run < chars.len() && chars[i + run] == c {
			run += 1;
		}
		match c {
			'y' => out.push_str(if run >= 4 { "%Y" } else { "%y" }),
			'M' => out.push_str("%m"),
			'd' => out.push_str("%d"),
			'H' => out.push_str("%H"),
			'm' => out.push_str("%M"),
			's' => out.push_str("%S"),
			'S' => out.push_str("%3f"),
			'Z' => out.push_str("%z"),
			// '%' has meaning to chrono and must be escaped.
			'%' => {
				for _ in 0..run {
					out.push_str("%%");
				}
			}
			other => {
				for _ in 0..run {
					out.push(other);
				}
			}
		}
		i += run;
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn fixed_now() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2016, 2, 8, 13, 14, 15).unwrap()
	}

	#[test]
	fn test_date_token() {
		let id = expand("$date.ddMMyyyyHHmmssZ$", "S", "R", fixed_now());
		assert_eq!(id, "08022016131415+0000");
	}

	#[test]
	fn test_party_tokens() {
		let id = expand(
			"$msg.sender.as2_id$_$msg.receiver.as2_id$",
			"POP000092",
			"POP000011",
			fixed_now(),
		);
		assert_eq!(id, "POP000092_POP000011");
	}

	#[test]
	fn test_rand_token_width() {
		let id = expand("$rand.1234$", "S", "R", fixed_now());
		assert_eq!(id.len(), 4);
		assert!(id.chars().all(|c| c.is_ascii_digit()));
	}

	#[test]
	fn test_unknown_token_kept() {
		let id = expand("a$nope$b", "S", "R", fixed_now());
		assert_eq!(id, "a$nope$b");
	}

	#[test]
	fn test_default_template_shape() {
		let id = expand(DEFAULT_MESSAGE_ID_TEMPLATE, "POP000092", "POP000011", fixed_now());
		assert!(id.starts_with("OpenPEPPOL-08022016131415+0000-"));
		assert!(id.ends_with("@POP000092_POP000011"));
	}
}
