use serde::Serialize;

/// Print `payload` as pretty JSON on stdout.
pub(crate) fn emit_json<T: Serialize>(payload: &T) {
	match serde_json::to_string_pretty(payload) {
		Ok(text) => println!("{text}"),
		Err(err) => eprintln!("error: failed to encode json: {err}"),
	}
}

/// Render a content hash as fixed-width hex.
pub(crate) fn hash_hex(hash: u64) -> String {
	format!("{hash:016x}")
}

/// Label for an optional mod owner.
pub(crate) fn mod_label(name: Option<&str>) -> &str {
	name.unwrap_or("core")
}
