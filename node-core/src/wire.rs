//! Small text helpers shared by the UDP protocol parsers.

use winnow::ascii::digit0;
use winnow::combinator::{opt, preceded};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

/// Reads a leading decimal integer the way the control protocols expect.
///
/// Leading whitespace and a sign are accepted, parsing stops at the first
/// non-digit, text without digits reads as 0 and negative values read as 0.
/// Values too large for `u64` saturate.
pub(crate) fn leading_decimal(text: &str) -> u64 {
    let mut input = text;
    let Ok((sign, digits)) = signed_digits.parse_next(&mut input) else {
        return 0;
    };
    if sign == Some('-') {
        return 0;
    }
    digits.bytes().fold(0u64, |value, digit| {
        value
            .saturating_mul(10)
            .saturating_add(u64::from(digit - b'0'))
    })
}

fn signed_digits<'a>(input: &mut &'a str) -> ModalResult<(Option<char>, &'a str)> {
    preceded(
        take_while(0.., |c: char| c.is_ascii_whitespace()),
        (opt(one_of(['+', '-'])), digit0),
    )
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::leading_decimal;

    #[test]
    fn reads_prefix_digits() {
        assert_eq!(leading_decimal("30"), 30);
        assert_eq!(leading_decimal(" 42abc"), 42);
        assert_eq!(leading_decimal("+7"), 7);
        assert_eq!(leading_decimal("abc"), 0);
        assert_eq!(leading_decimal(""), 0);
        assert_eq!(leading_decimal("-12"), 0);
        assert_eq!(leading_decimal("99999999999999999999999"), u64::MAX);
    }
}
