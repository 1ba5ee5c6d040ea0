/// Symbols submitted together in one model call.
pub type Batch = Vec<String>;

/// Consecutive chunks of at most `size` symbols, input order preserved.
///
/// `size` is validated upstream (`AnalyzerOptions::validate`); a zero here is
/// treated as one rather than looping forever.
pub fn make_batches(symbols: &[String], size: usize) -> Vec<Batch> {
    symbols.chunks(size.max(1)).map(<[String]>::to_vec).collect()
}

/// Trims, upper-cases and de-duplicates symbols, keeping first occurrences.
pub fn normalize_symbols<I, S>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for s in symbols {
        let s = s.as_ref().trim().to_uppercase();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}
