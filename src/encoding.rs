// Text decoding for delimited exports - encoding probing and delimiter sniffing
//
// Dutch bank exports show up as UTF-8 (with or without BOM), UTF-16 from
// spreadsheet "save as", and Windows-1252 / Latin-1 from older portals.

use encoding_rs::{Encoding, ISO_8859_15, UTF_8, WINDOWS_1252};

/// Encodings tried in order when the file carries no BOM.
/// Windows-1252 covers the labels `latin-1`, `iso-8859-1` and `cp1252`.
pub const ENCODING_PRIORITY: &[&Encoding] = &[UTF_8, WINDOWS_1252, ISO_8859_15];

const DELIMITER_CANDIDATES: &[u8] = &[b',', b';', b'\t', b'|'];

/// A decoded delimited file ready for the csv reader.
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static Encoding,
    pub delimiter: u8,
}

/// Try each encoding until one decodes cleanly and yields a readable,
/// multi-column header row. `None` when no encoding qualifies.
pub fn decode_with_fallback(bytes: &[u8]) -> Option<DecodedText> {
    let mut candidates: Vec<(&'static Encoding, &[u8])> = Vec::new();
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        candidates.push((encoding, &bytes[bom_len..]));
    }
    candidates.extend(ENCODING_PRIORITY.iter().map(|&e| (e, bytes)));

    for (encoding, payload) in candidates {
        let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(payload)
        else {
            log::debug!("{} rejected: malformed byte sequence", encoding.name());
            continue;
        };

        if let Some(delimiter) = readable_header_delimiter(&text) {
            log::debug!(
                "decoded with {} (delimiter {:?})",
                encoding.name(),
                delimiter as char
            );
            return Some(DecodedText {
                text: text.into_owned(),
                encoding,
                delimiter,
            });
        }
        log::debug!("{} rejected: header row unreadable", encoding.name());
    }

    None
}

/// Delimiter of the header row, or `None` when the header contains control
/// characters or does not split into more than one column.
fn readable_header_delimiter(text: &str) -> Option<u8> {
    let header = text.lines().find(|line| !line.trim().is_empty())?;

    let has_garbage = header
        .chars()
        .any(|c| c == '\u{fffd}' || (c.is_control() && c != '\t' && c != '\r'));
    if has_garbage {
        return None;
    }

    let delimiter = sniff_delimiter(text);
    (count_fields(header, delimiter) > 1).then_some(delimiter)
}

/// Detect the most likely field delimiter by checking consistency across the
/// first few lines. Ties go to the candidate with more columns.
pub fn sniff_delimiter(content: &str) -> u8 {
    let sample_lines: Vec<&str> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(10)
        .collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in DELIMITER_CANDIDATES {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| count_fields(line, delim))
            .collect();

        if counts[0] <= 1 {
            continue;
        }

        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

fn count_fields(line: &str, delimiter: u8) -> usize {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes())
        .records()
        .next()
        .and_then(|r| r.ok())
        .map(|r| r.len())
        .unwrap_or(1)
}

// ============================================================================
// TESTS
// ============================================================================
