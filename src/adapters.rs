//! Adapter selection
//!
//! Parses the compact adapter list syntax (`all`, `0-2`, `0,1,3-5`) used by the
//! `--adapters` option and by the `:ADAPTERS` segment of a parameter, and
//! iterates the active adapter indices a selection resolves to.

use std::fmt;
use thiserror::Error;

/// Errors produced while parsing an adapter list
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterListError {
    #[error("Can't parse adapter index in '{0}'")]
    BadIndex(String),
    #[error("Wrong range of adapter indices in adapter list: {start}-{end}")]
    WrongRange { start: usize, end: usize },
    #[error("Garbage at adapter list: '{0}'")]
    Garbage(String),
}

/// Set of adapters addressed by a parameter or the `--adapters` option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterSelector {
    /// Every active adapter
    All,
    /// Explicit indices, ascending and duplicate-free
    List(Vec<usize>),
}

impl Default for AdapterSelector {
    fn default() -> Self {
        AdapterSelector::List(vec![0])
    }
}

impl AdapterSelector {
    /// Iterate the active adapter indices this selection resolves to
    pub fn iter(&self, active_count: usize) -> AdapterIter<'_> {
        AdapterIter {
            selector: self,
            active_count,
            position: 0,
        }
    }

    /// Explicit indices, empty for `All`
    pub fn explicit(&self) -> &[usize] {
        match self {
            AdapterSelector::All => &[],
            AdapterSelector::List(list) => list,
        }
    }

    /// First explicit index that is not below `active_count`
    pub fn first_out_of_range(&self, active_count: usize) -> Option<usize> {
        self.explicit().iter().copied().find(|&i| i >= active_count)
    }
}

impl fmt::Display for AdapterSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterSelector::All => write!(f, "all"),
            AdapterSelector::List(list) => {
                let parts: Vec<String> = list.iter().map(|i| i.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl std::str::FromStr for AdapterSelector {
    type Err = AdapterListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_adapter_list(s)
    }
}

/// Cursor over the indices of an [`AdapterSelector`]
///
/// For `All` it yields `0..active_count`; for a list it yields the members in
/// ascending order regardless of `active_count`, so out-of-range members stay
/// visible to whoever checks them.
#[derive(Debug, Clone)]
pub struct AdapterIter<'a> {
    selector: &'a AdapterSelector,
    active_count: usize,
    position: usize,
}

impl Iterator for AdapterIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let item = match self.selector {
            AdapterSelector::All => (self.position < self.active_count).then_some(self.position),
            AdapterSelector::List(list) => list.get(self.position).copied(),
        };
        if item.is_some() {
            self.position += 1;
        }
        item
    }
}

/// Parse an adapter list: `all` or comma-separated indices and `first-last` ranges
pub fn parse_adapter_list(input: &str) -> Result<AdapterSelector, AdapterListError> {
    if input == "all" {
        return Ok(AdapterSelector::All);
    }

    let mut adapters = Vec::new();
    let mut rest = input;
    loop {
        let (start, after) = take_index(rest)?;
        rest = after;

        if let Some(after_dash) = rest.strip_prefix('-') {
            let (end, after) = take_index(after_dash)?;
            rest = after;
            if start > end {
                return Err(AdapterListError::WrongRange { start, end });
            }
            adapters.extend(start..=end);
        } else {
            adapters.push(start);
        }

        if rest.is_empty() {
            break;
        }
        match rest.strip_prefix(',') {
            Some(after_comma) => rest = after_comma,
            None => return Err(AdapterListError::Garbage(rest.to_string())),
        }
    }

    adapters.sort_unstable();
    adapters.dedup();
    Ok(AdapterSelector::List(adapters))
}

/// Split a leading run of ASCII digits off `input` and parse it
///
/// Indices are bounded to `u16`, which also bounds how far a range expands.
fn take_index(input: &str) -> Result<(usize, &str), AdapterListError> {
    let digits = input.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(AdapterListError::BadIndex(input.to_string()));
    }
    let (number, rest) = input.split_at(digits);
    let index: u16 = number
        .parse()
        .map_err(|_| AdapterListError::BadIndex(number.to_string()))?;
    Ok((usize::from(index), rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[usize]) -> AdapterSelector {
        AdapterSelector::List(items.to_vec())
    }

    #[test]
    fn test_all_marker() {
        assert_eq!(parse_adapter_list("all").unwrap(), AdapterSelector::All);
        assert!(parse_adapter_list(" all").is_err());
        assert!(parse_adapter_list("all ").is_err());
        assert!(parse_adapter_list("ALL").is_err());
    }

    #[test]
    fn test_single_and_ranges() {
        assert_eq!(parse_adapter_list("3").unwrap(), list(&[3]));
        assert_eq!(parse_adapter_list("0-2").unwrap(), list(&[0, 1, 2]));
        assert_eq!(parse_adapter_list("0,1,3-5").unwrap(), list(&[0, 1, 3, 4, 5]));
        assert_eq!(parse_adapter_list("4-4").unwrap(), list(&[4]));
    }

    #[test]
    fn test_sorted_and_deduplicated() {
        assert_eq!(parse_adapter_list("0,2,1-3").unwrap(), list(&[0, 1, 2, 3]));
        assert_eq!(parse_adapter_list("5,0,0,5").unwrap(), list(&[0, 5]));
    }

    #[test]
    fn test_invalid_lists() {
        assert_eq!(
            parse_adapter_list("0,0,2-0"),
            Err(AdapterListError::WrongRange { start: 2, end: 0 })
        );
        assert!(matches!(parse_adapter_list(""), Err(AdapterListError::BadIndex(_))));
        assert!(matches!(parse_adapter_list("x"), Err(AdapterListError::BadIndex(_))));
        assert!(matches!(parse_adapter_list("1,"), Err(AdapterListError::BadIndex(_))));
        assert!(matches!(parse_adapter_list("1-"), Err(AdapterListError::BadIndex(_))));
        assert!(matches!(parse_adapter_list("-1"), Err(AdapterListError::BadIndex(_))));
        assert!(matches!(parse_adapter_list("1;2"), Err(AdapterListError::Garbage(_))));
        assert!(matches!(parse_adapter_list("1 "), Err(AdapterListError::Garbage(_))));
        assert!(matches!(
            parse_adapter_list("99999999999999999999999"),
            Err(AdapterListError::BadIndex(_))
        ));
    }

    #[test]
    fn test_huge_ranges_are_rejected() {
        assert_eq!(
            parse_adapter_list("0-18446744073709551615"),
            Err(AdapterListError::BadIndex("18446744073709551615".to_string()))
        );
        assert!(matches!(parse_adapter_list("0-65536"), Err(AdapterListError::BadIndex(_))));
        assert!(matches!(parse_adapter_list("4000000000"), Err(AdapterListError::BadIndex(_))));

        let widest = parse_adapter_list("0-65535").unwrap();
        assert_eq!(widest.explicit().len(), 65536);
        assert_eq!(widest.first_out_of_range(4), Some(4));
    }

    #[test]
    fn test_iterator() {
        let all = AdapterSelector::All;
        assert_eq!(all.iter(3).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(all.iter(0).count(), 0);

        let some = list(&[1, 4]);
        assert_eq!(some.iter(2).collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(some.first_out_of_range(2), Some(4));
        assert_eq!(some.first_out_of_range(5), None);
        assert_eq!(all.first_out_of_range(0), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(AdapterSelector::All.to_string(), "all");
        assert_eq!(list(&[0, 2, 3]).to_string(), "0,2,3");
        assert_eq!(AdapterSelector::default(), list(&[0]));
    }
}
