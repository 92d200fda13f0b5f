//! Validation of dataset records
//!
//! Raw dataset lines are noisy: OCR errors, punctuation, numbers, grammar
//! tags... Lines which don't look like a well-formed ngram of plain words are
//! silently discarded, since there are far too many of them to report.

use crate::{catalog::GramOrder, MatchCount, Ngram};
use csv_async::ByteRecord;

/// Truth that a token only contains ASCII letters
pub fn is_alpha(token: &[u8]) -> bool {
    !token.is_empty() && token.iter().all(u8::is_ascii_alphabetic)
}

/// Truth that an ngram is made of at least one token, and only of plain words
///
/// The number of tokens is not checked here, see [`parse_record`].
pub fn is_clean_gram<T: AsRef<[u8]>>(tokens: &[T]) -> bool {
    !tokens.is_empty() && tokens.iter().all(|token| is_alpha(token.as_ref()))
}

/// Extract the ngram and match count from a record, if it is acceptable
///
/// Records are `ngram<TAB>year<TAB>match_count[<TAB>volume_count]`. The
/// record is rejected if it has less than 3 fields, if the match count is not
/// an integer, or if the ngram is not made of exactly `order` clean tokens.
pub fn parse_record(record: &ByteRecord, order: GramOrder) -> Option<(Ngram, MatchCount)> {
    if record.len() < 3 {
        log::trace!("Rejected {record:?} because it has too few fields");
        return None;
    }
    let match_count = std::str::from_utf8(&record[2])
        .ok()?
        .trim()
        .parse::<MatchCount>()
        .ok()?;
    let ngram = &record[0];
    let tokens = ngram.split(|&b| b == b' ').collect::<Vec<_>>();
    if tokens.len() != order.get() || !is_clean_gram(&tokens) {
        log::trace!("Rejected {record:?} because it is not a clean {order}");
        return None;
    }
    // Clean ngrams are pure ASCII, so this cannot fail
    let ngram = std::str::from_utf8(ngram).ok()?;
    Some((ngram.into(), match_count))
}
