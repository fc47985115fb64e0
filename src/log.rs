//! Structured single-line logging to stderr, in the `QSYS|mod=...|evt=...`
//! style already used by this crate's networking layer. No wall-clock is
//! consulted for business logic; timestamps here are operational only.

/// Emits one structured log line. `fields` are rendered `key=value`,
/// joined with `|`, in the order given.
pub fn emit(module: &str, event: &str, fields: &[(&str, &dyn std::fmt::Display)]) {
    let mut line = format!("QSYS|mod={module}|evt={event}");
    for (key, value) in fields {
        line.push('|');
        line.push_str(key);
        line.push('=');
        line.push_str(&value.to_string());
    }
    eprintln!("{line}");
}

/// Convenience macro mirroring [`emit`] without building the slice by hand.
///
/// ```ignore
/// qlog!("REGISTRY", "INHALE", "imported" => report.crystals_imported, "failed" => report.crystals_failed);
/// ```
#[macro_export]
macro_rules! qlog {
    ($module:expr, $event:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::log::emit($module, $event, &[$(($key, &$value as &dyn std::fmt::Display)),*]);
    };
}
