//! Helpers for the tabular and list-shaped output the tools print.

/// Non-empty lines of tool output.
pub fn lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().filter(|line| !line.trim().is_empty())
}

/// Split on a separator, dropping empty columns.
///
/// Tool output pads columns with runs of the separator, so empty fields
/// never carry meaning.
pub fn columns(line: &str, separator: char) -> Vec<&str> {
    line.split(separator)
        .map(str::trim)
        .filter(|column| !column.is_empty())
        .collect()
}

/// Names from a single-line, space-separated jsonpath listing.
pub fn names(output: &str) -> Vec<&str> {
    output.split_whitespace().collect()
}

/// Parse a `<ready>/<desired>` replica column.
pub fn replica_ratio(column: &str) -> Option<(u32, u32)> {
    let (ready, desired) = column.split_once('/')?;
    Some((ready.parse().ok()?, desired.parse().ok()?))
}

/// First column of every row of a tab-separated table after its header.
pub fn first_column_after_header(output: &str) -> Vec<&str> {
    lines(output)
        .skip(1)
        .filter_map(|line| columns(line, '\t').first().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_collapse_padding() {
        assert_eq!(
            columns("tiller-deploy-5c688d5f9b-x   1/1     Running   0   2m", ' '),
            vec!["tiller-deploy-5c688d5f9b-x", "1/1", "Running", "0", "2m"]
        );
    }

    #[test]
    fn replica_ratio_parses_and_rejects() {
        assert_eq!(replica_ratio("1/1"), Some((1, 1)));
        assert_eq!(replica_ratio("0/2"), Some((0, 2)));
        assert_eq!(replica_ratio("/1"), None);
        assert_eq!(replica_ratio("1/"), None);
        assert_eq!(replica_ratio("Running"), None);
    }

    #[test]
    fn release_listing_skips_header() {
        let output = "NAME\tREVISION\tUPDATED\n\
                      physics-web\t1\tMon Jan  1\n\
                      physics-db \t2\tMon Jan  1\n";
        assert_eq!(
            first_column_after_header(output),
            vec!["physics-web", "physics-db"]
        );
    }

    #[test]
    fn empty_release_listing() {
        assert!(first_column_after_header("").is_empty());
        assert!(first_column_after_header("NAME\tREVISION\n").is_empty());
    }

    #[test]
    fn names_split_on_whitespace() {
        assert_eq!(names("default fleet-system\n"), vec!["default", "fleet-system"]);
        assert!(names("").is_empty());
    }
}
