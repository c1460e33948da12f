//! Small set of regex rules deciding read-vs-write and extracting the
//! affected/read table names Stash needs for invalidation and indexing.

use std::sync::OnceLock;

use regex::Regex;

fn modifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:^|\s)(INSERT|DELETE|UPDATE|LOCK|VACUUM|TRANSACTION|COMMIT|ROLLBACK|REINDEX|TRUNCATE|CREATE|ALTER|DROP|SET)\b",
        )
        .unwrap()
    })
}

fn pg_function_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bpg_[A-Za-z0-9_]*\s*\(").unwrap())
}

fn affected_table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:UPDATE|INSERT INTO|DELETE FROM|TRUNCATE|ALTER TABLE|DROP TABLE)\s+([a-z_][a-z0-9_]*)")
            .unwrap()
    })
}

fn read_table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([a-z_][a-z0-9_]*)").unwrap())
}

/// Whether `canonical` is a write statement: one of the modifier keywords,
/// or a call to a `pg_*` administrative function. `LOCK` matches here but
/// never yields an affected table, so it invalidates nothing - treated as
/// side-effecting with no table-level invalidation.
pub fn is_write(canonical: &str) -> bool {
    modifier_regex().is_match(canonical) || pg_function_regex().is_match(canonical)
}

/// Table names a write statement affects. DDL like `CREATE TABLE foo(...)`
/// yields none (the regex only fires for `ALTER TABLE`/`DROP TABLE`, not
/// `CREATE TABLE`).
pub fn affected_tables(canonical: &str) -> Vec<String> {
    affected_table_regex()
        .captures_iter(canonical)
        .map(|c| c[1].to_string())
        .collect()
}

/// Table names a read statement references, deduped, in first-seen order.
/// Lowercase identifiers only - a known limitation inherited from the
/// source this was distilled from; real PostgreSQL allows mixed-case
/// quoted identifiers this regex will simply miss.
pub fn read_tables(canonical: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for cap in read_table_regex().captures_iter(canonical) {
        let table = cap[1].to_string();
        if seen.insert(table.clone()) {
            out.push(table);
        }
    }
    out
}

/// Whether the canonical SQL contains a standalone `NOW()` token. Queries
/// referencing it are never cached.
pub fn contains_now(canonical: &str) -> bool {
    canonical
        .split_whitespace()
        .any(|tok| tok.eq_ignore_ascii_case("NOW()"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_insert_as_write() {
        assert!(is_write("INSERT INTO book (title) VALUES ($1)"));
    }

    #[test]
    fn classifies_select_as_read() {
        assert!(!is_write("SELECT * FROM book"));
    }

    #[test]
    fn lock_is_a_write_with_no_affected_table() {
        assert!(is_write("LOCK TABLE book"));
        assert!(affected_tables("LOCK TABLE book").is_empty());
    }

    #[test]
    fn pg_admin_function_is_a_write() {
        assert!(is_write("SELECT pg_reload_conf()"));
    }

    #[test]
    fn extracts_affected_table_from_insert() {
        assert_eq!(
            affected_tables("INSERT INTO book (title) VALUES ($1)"),
            vec!["book".to_string()]
        );
    }

    #[test]
    fn extracts_read_tables_deduped() {
        assert_eq!(
            read_tables("SELECT * FROM book JOIN author ON author.id = book.author_id JOIN book b2"),
            vec!["book".to_string(), "author".to_string()]
        );
    }

    #[test]
    fn detects_now_token() {
        assert!(contains_now("SELECT * FROM book WHERE updated_at > NOW()"));
        assert!(!contains_now("SELECT * FROM book WHERE title = 'NOW()ish'"));
    }
}
