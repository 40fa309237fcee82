//! Japanese era (和暦) year labels → Gregorian years.
//!
//! Standalone helper; the crawl pipeline does not call it. Only the three
//! modern eras are known, each mapped by a fixed offset so that year 1 of the
//! era lands on its first Gregorian year.

use crate::error::EraError;
use crate::utils::digit_value;

/// Known era prefixes and the offset added to the era year.
const ERAS: [(&str, i32); 3] = [
    ("昭和", 1925), // 昭和1年 = 1926
    ("平成", 1988), // 平成1年 = 1989
    ("令和", 2018), // 令和1年 = 2019
];

/// Convert a label such as `平成31年` or `令和元年` into a Gregorian year.
///
/// The year number is read from the label's digits (ASCII or full-width)
/// with everything else ignored, so `昭和 64 年`, `昭和６４年` and `昭和64`
/// all work. A label without
/// digits that contains `元` means the era's first year.
///
/// # Errors
///
/// - [`EraError::UnknownEraFormat`] when the label starts with no known era.
/// - [`EraError::MissingYear`] when no year number can be found.
///
/// # Examples
///
/// ```
/// use kabuka::era::convert_era_year;
///
/// assert_eq!(convert_era_year("昭和64年").unwrap(), 1989);
/// assert_eq!(convert_era_year("令和元年").unwrap(), 2019);
/// assert!(convert_era_year("大正10年").is_err());
/// ```
pub fn convert_era_year(label: &str) -> Result<i32, EraError> {
    let trimmed = label.trim();
    let (_, offset) = ERAS
        .iter()
        .find(|(prefix, _)| trimmed.starts_with(prefix))
        .ok_or_else(|| EraError::UnknownEraFormat {
            label: label.to_string(),
        })?;

    let digits: Vec<u32> = trimmed.chars().filter_map(digit_value).collect();
    let year = if digits.is_empty() {
        if trimmed.contains('元') {
            1
        } else {
            return Err(EraError::MissingYear {
                label: label.to_string(),
            });
        }
    } else {
        digits
            .iter()
            .try_fold(0i32, |acc, d| acc.checked_mul(10)?.checked_add(*d as i32))
            .ok_or_else(|| EraError::MissingYear {
                label: label.to_string(),
            })?
    };

    Ok(offset + year)
}
