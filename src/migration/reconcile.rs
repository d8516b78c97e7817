//! Name-based matching of destination columns to source columns.

use crate::error::MigrationWarning;
use crate::introspection::ColumnDescriptor;
use serde::Serialize;

/// Which rule produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchBasis {
    Exact,
    Normalized,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMatch {
    pub source: String,
    pub dest: String,
    pub basis: MatchBasis,
}

/// Outcome of reconciling one table
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// One entry per matched destination column, in destination order
    pub matches: Vec<ColumnMatch>,
    pub warnings: Vec<MigrationWarning>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

fn canonical(name: &str) -> String {
    name.trim().to_lowercase()
}

fn without_underscores(name: &str) -> String {
    name.chars().filter(|c| *c != '_').collect()
}

fn rule_applies(basis: MatchBasis, dest: &str, source: &str) -> bool {
    if dest.is_empty() || source.is_empty() {
        return false;
    }
    match basis {
        MatchBasis::Exact => dest == source,
        MatchBasis::Normalized => {
            let d = without_underscores(dest);
            !d.is_empty() && d == without_underscores(source)
        }
        MatchBasis::Substring => dest.contains(source) || source.contains(dest),
    }
}

/// Match every destination column to at most one source column.
///
/// Rules are tried in order: exact, underscore-stripped, substring. The first
/// rule with exactly one candidate wins. Substring ties go to the lowest
/// source ordinal. When an earlier rule was ambiguous and substring does not
/// produce a single candidate, the first candidate of that earlier rule is used.
pub fn reconcile(dest_columns: &[String], source_columns: &[ColumnDescriptor]) -> Reconciliation {
    let mut sources: Vec<&ColumnDescriptor> = source_columns.iter().collect();
    sources.sort_by_key(|c| c.ordinal);
    let source_names: Vec<String> = sources.iter().map(|c| canonical(&c.name)).collect();

    let mut result = Reconciliation::default();

    // Matching is case-insensitive; the destination keeps its spelling
    for dest in dest_columns {
        let dest_name = dest.trim().to_string();
        match match_one(&canonical(&dest_name), &source_names) {
            Some((idx, basis)) => result.matches.push(ColumnMatch {
                source: sources[idx].name.clone(),
                dest: dest_name,
                basis,
            }),
            None => result.warnings.push(MigrationWarning::UnmatchedColumn { column: dest_name }),
        }
    }

    result
}

fn match_one(dest: &str, sources: &[String]) -> Option<(usize, MatchBasis)> {
    let mut first_ambiguous = None;

    for basis in [MatchBasis::Exact, MatchBasis::Normalized, MatchBasis::Substring] {
        let candidates: Vec<usize> = sources
            .iter()
            .enumerate()
            .filter(|(_, source)| rule_applies(basis, dest, source))
            .map(|(idx, _)| idx)
            .collect();

        match candidates.as_slice() {
            [] => continue,
            [only] => return Some((*only, basis)),
            [first, ..] if basis == MatchBasis::Substring => {
                return first_ambiguous.or(Some((*first, basis)));
            }
            [first, ..] => {
                if first_ambiguous.is_none() {
                    first_ambiguous = Some((*first, basis));
                }
            }
        }
    }

    first_ambiguous
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sources(names: &[&str]) -> Vec<ColumnDescriptor> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| ColumnDescriptor::new(*n, "VARCHAR2", i as i32 + 1))
            .collect()
    }

    fn dest(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_exact_match_is_case_insensitive() {
        let result = reconcile(&dest(&["id", "name"]), &sources(&["ID", "NAME"]));
        assert_eq!(
            result.matches,
            vec![
                ColumnMatch { source: "id".into(), dest: "id".into(), basis: MatchBasis::Exact },
                ColumnMatch { source: "name".into(), dest: "name".into(), basis: MatchBasis::Exact },
            ]
        );
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_destination_spelling_is_preserved() {
        let result = reconcile(&dest(&["ID", "FullName", "Notes"]), &sources(&["ID", "FULLNAME", "REMARK"]));
        assert_eq!(
            result.matches,
            vec![
                ColumnMatch { source: "id".into(), dest: "ID".into(), basis: MatchBasis::Exact },
                ColumnMatch { source: "fullname".into(), dest: "FullName".into(), basis: MatchBasis::Exact },
            ]
        );
        assert_eq!(result.warnings, vec![MigrationWarning::UnmatchedColumn { column: "Notes".into() }]);
    }

    #[test]
    fn test_underscore_normalization() {
        let result = reconcile(&dest(&["firstname"]), &sources(&["FIRST_NAME", "LAST_NAME"]));
        assert_eq!(result.matches[0].source, "first_name");
        assert_eq!(result.matches[0].basis, MatchBasis::Normalized);
    }

    #[test]
    fn test_substring_in_either_direction() {
        let result = reconcile(&dest(&["customer_email", "tel"]), &sources(&["EMAIL", "TELEPHONE"]));
        assert_eq!(result.matches[0].source, "email");
        assert_eq!(result.matches[0].basis, MatchBasis::Substring);
        assert_eq!(result.matches[1].source, "telephone");
    }

    #[test]
    fn test_substring_tie_uses_lowest_ordinal() {
        let mut cols = sources(&["ADDR_LINE2", "ADDR_LINE1"]);
        cols[0].ordinal = 5;
        cols[1].ordinal = 2;
        let result = reconcile(&dest(&["addr"]), &cols);
        assert_eq!(result.matches[0].source, "addr_line1");
    }

    #[test]
    fn test_ambiguous_exact_falls_back_to_first_candidate() {
        let result = reconcile(&dest(&["code"]), &sources(&["Code", "CODE"]));
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].basis, MatchBasis::Exact);
        assert_eq!(result.matches[0].source, "code");
    }

    #[test]
    fn test_unmatched_column_is_excluded_with_warning() {
        let result = reconcile(&dest(&["id", "created_by"]), &sources(&["ID", "NAME"]));
        assert_eq!(result.matches.len(), 1);
        assert_eq!(
            result.warnings,
            vec![MigrationWarning::UnmatchedColumn { column: "created_by".into() }]
        );
    }

    #[test]
    fn test_empty_names_never_match() {
        let result = reconcile(&dest(&["", "_"]), &sources(&["ID", "_"]));
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].dest, "_");
        assert_eq!(result.matches[0].basis, MatchBasis::Exact);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let d = dest(&["a_b", "ab", "b", "zz"]);
        let s = sources(&["AB", "A_B", "ABC", "B"]);
        let first = reconcile(&d, &s);
        for _ in 0..10 {
            let again = reconcile(&d, &s);
            assert_eq!(again.matches, first.matches);
            assert_eq!(again.warnings, first.warnings);
        }
    }
}
