//! Derives the operation name and primary table from SQL text.

use once_cell::sync::Lazy;
use regex::Regex;

/// SQL operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOperation {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Truncate,
    Begin,
    Commit,
    Rollback,
    Other,
}

impl SqlOperation {
    /// Operation name as matched against the tracer's allow-list.
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlOperation::Select => "SELECT",
            SqlOperation::Insert => "INSERT",
            SqlOperation::Update => "UPDATE",
            SqlOperation::Delete => "DELETE",
            SqlOperation::Create => "CREATE",
            SqlOperation::Drop => "DROP",
            SqlOperation::Alter => "ALTER",
            SqlOperation::Truncate => "TRUNCATE",
            SqlOperation::Begin => "BEGIN",
            SqlOperation::Commit => "COMMIT",
            SqlOperation::Rollback => "ROLLBACK",
            SqlOperation::Other => "QUERY",
        }
    }

    /// Parse the operation from the leading keyword of `sql`.
    pub fn parse(sql: &str) -> Self {
        let keyword: String = sql
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();

        match keyword.as_str() {
            "SELECT" | "WITH" => SqlOperation::Select,
            "INSERT" => SqlOperation::Insert,
            "UPDATE" => SqlOperation::Update,
            "DELETE" => SqlOperation::Delete,
            "CREATE" => SqlOperation::Create,
            "DROP" => SqlOperation::Drop,
            "ALTER" => SqlOperation::Alter,
            "TRUNCATE" => SqlOperation::Truncate,
            "BEGIN" | "START" => SqlOperation::Begin,
            "COMMIT" => SqlOperation::Commit,
            "ROLLBACK" => SqlOperation::Rollback,
            _ => SqlOperation::Other,
        }
    }

    fn table_regex(&self) -> Option<&'static Regex> {
        let regex = match self {
            SqlOperation::Select | SqlOperation::Delete => &FROM_TABLE,
            SqlOperation::Insert => &INTO_TABLE,
            SqlOperation::Update => &UPDATE_TABLE,
            SqlOperation::Create | SqlOperation::Drop | SqlOperation::Alter => &DDL_TABLE,
            SqlOperation::Truncate => &TRUNCATE_TABLE,
            _ => return None,
        };
        Some(&**regex)
    }
}

impl std::fmt::Display for SqlOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Optional quoting (`"`, `` ` ``, `[`) and an optional schema prefix are
// skipped; the captured group is the bare table name.
const IDENT: &str = r#"[`"\[]?(?:\w+[`"\]]?\.[`"\[]?)?(\w+)[`"\]]?"#;

fn table_pattern(prefix: &str) -> Regex {
    Regex::new(&format!("(?i){}{}", prefix, IDENT)).expect("table pattern is valid")
}

static FROM_TABLE: Lazy<Regex> = Lazy::new(|| table_pattern(r"\bFROM\s+"));

static INTO_TABLE: Lazy<Regex> = Lazy::new(|| table_pattern(r"\bINSERT\s+INTO\s+"));

static UPDATE_TABLE: Lazy<Regex> = Lazy::new(|| table_pattern(r"\bUPDATE\s+(?:ONLY\s+)?"));

static DDL_TABLE: Lazy<Regex> = Lazy::new(|| {
    table_pattern(r"\b(?:CREATE\s+(?:TEMP(?:ORARY)?\s+)?|DROP\s+|ALTER\s+)TABLE\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?")
});

static TRUNCATE_TABLE: Lazy<Regex> = Lazy::new(|| table_pattern(r"\bTRUNCATE\s+(?:TABLE\s+)?"));

/// Operation and table of one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSql {
    pub operation: SqlOperation,
    pub table: Option<String>,
}

impl ParsedSql {
    pub fn parse(sql: &str) -> Self {
        let operation = SqlOperation::parse(sql);
        let table = operation
            .table_regex()
            .and_then(|regex| regex.captures(sql))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_lowercase());
        Self { operation, table }
    }
}
