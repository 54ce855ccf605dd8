/// Counter for turnstile entries seen, labelled by line
pub const TURNSTILE_ENTRIES: &str = "turnstile_entries_total";
