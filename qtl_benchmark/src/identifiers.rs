//! Parsing of the compound SNP tokens used by the caQTL release,
//! e.g. `chr12:9436083_rs61916194`.

const RS_MARKER: &str = "_rs";

/// Returns the rs-ID embedded in a compound token, or `None` when the token
/// carries no `_rs` marker.
pub fn extract_rs_id(token: &str) -> Option<String> {
    token
        .split_once(RS_MARKER)
        .map(|(_, rest)| format!("rs{}", rest))
}

/// Parses the `chrom:pos` prefix of a compound token. The `chr` prefix is
/// dropped from the chromosome; the position ends at the first `_`.
pub fn parse_coordinate_token(token: &str) -> Option<(String, i64)> {
    let mut parts = token.split(':');
    let chrom = parts.next()?.replace("chr", "");
    let pos_field = parts.next()?;
    let pos = pos_field.split('_').next()?.trim().parse::<i64>().ok()?;
    if chrom.is_empty() {
        return None;
    }
    Some((chrom, pos))
}
