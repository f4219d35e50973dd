//! Lexical SQL safety classification.
//!
//! Statements are split on `;` outside quotes and comments, then each one is
//! scanned for destructive operations that lack a scoping predicate. This is
//! a heuristic over tokens, not a SQL parser.

use crate::validation::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    CreateTable,
    CreateDatabase,
    AlterTable,
    DropTable,
    DropDatabase,
    Truncate,
    Show,
    Describe,
    Explain,
    Use,
    Unknown,
}

impl StatementKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::CreateTable => "create_table",
            Self::CreateDatabase => "create_database",
            Self::AlterTable => "alter_table",
            Self::DropTable => "drop_table",
            Self::DropDatabase => "drop_database",
            Self::Truncate => "truncate",
            Self::Show => "show",
            Self::Describe => "describe",
            Self::Explain => "explain",
            Self::Use => "use",
            Self::Unknown => "unknown",
        }
    }

    /// Statements whose engine response is a row set.
    #[must_use]
    pub fn returns_rows(self) -> bool {
        matches!(
            self,
            Self::Select | Self::Show | Self::Describe | Self::Explain
        )
    }

    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DangerKind {
    DeleteWithoutWhere,
    UpdateWithoutWhere,
    Truncate,
    DropTable,
    DropDatabase,
}

impl DangerKind {
    #[must_use]
    pub fn warning(self) -> &'static str {
        match self {
            Self::DeleteWithoutWhere => "DELETE without WHERE clause will remove all rows",
            Self::UpdateWithoutWhere => "UPDATE without WHERE clause will modify all rows",
            Self::Truncate => "TRUNCATE will remove all rows from the table",
            Self::DropTable => "DROP TABLE will permanently remove the table",
            Self::DropDatabase => "DROP DATABASE will permanently remove the database",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementAssessment {
    pub sql: String,
    pub kind: StatementKind,
    pub danger: Option<DangerKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyClassification {
    pub statement_count: usize,
    pub is_multi_statement: bool,
    pub is_dangerous: bool,
    pub warnings: Vec<String>,
    /// Schema changes that are not destructive. Informational only.
    pub ddl_warnings: Vec<String>,
    pub statements: Vec<StatementAssessment>,
}

impl SafetyClassification {
    #[must_use]
    pub fn requires_confirmation(&self) -> bool {
        self.is_multi_statement || self.is_dangerous
    }

    pub fn all_warnings(&self) -> impl Iterator<Item = &str> {
        self.warnings
            .iter()
            .chain(self.ddl_warnings.iter())
            .map(String::as_str)
    }
}

pub fn classify(sql: &str) -> Result<SafetyClassification, ValidationError> {
    if sql.trim().is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    let statements = split_statements(sql)
        .into_iter()
        .map(|statement| assess_statement(&statement))
        .collect::<Vec<_>>();

    // Text made only of comments and terminators has nothing to run.
    if statements.is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    let statement_count = statements.len();
    let is_multi_statement = statement_count > 1;
    let mut warnings = Vec::new();
    let mut ddl_warnings = Vec::new();

    if is_multi_statement {
        warnings.push(format!("Query contains {statement_count} statements"));
    }

    for statement in &statements {
        if let Some(danger) = statement.danger {
            let warning = danger.warning().to_string();
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
            continue;
        }

        if let Some(keyword) = ddl_keyword(&statement.sql) {
            let warning = format!("{keyword} statement changes the schema");
            if !ddl_warnings.contains(&warning) {
                ddl_warnings.push(warning);
            }
        }
    }

    Ok(SafetyClassification {
        statement_count,
        is_multi_statement,
        is_dangerous: statements.iter().any(|statement| statement.danger.is_some()),
        warnings,
        ddl_warnings,
        statements,
    })
}

/// Splits on `;` outside string literals, quoted identifiers and comments.
/// Comments are dropped and empty candidates are skipped, so a trailing
/// terminator never produces an extra statement.
#[must_use]
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    let mut quote: Option<char> = None;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
                current.push(ch);
            }
            continue;
        }

        if in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
                current.push(' ');
            }
            continue;
        }

        if let Some(open) = quote {
            current.push(ch);
            if ch == '\\' && open != '`' {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if ch == open {
                quote = None;
            }
            continue;
        }

        match ch {
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                in_line_comment = true;
            }
            '#' => in_line_comment = true,
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                in_block_comment = true;
            }
            '\'' | '"' | '`' => {
                quote = Some(ch);
                current.push(ch);
            }
            ';' => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, candidate: &str) {
    let statement = candidate.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
}

#[must_use]
pub fn statement_kind(statement: &str) -> StatementKind {
    kind_of(main_clause(&tokenize(statement)))
}

fn kind_of(tokens: &[Token]) -> StatementKind {
    let first = tokens.first().map(|token| token.word.as_str());
    let second = tokens.get(1).map(|token| token.word.as_str());

    match (first, second) {
        (Some("SELECT"), _) => StatementKind::Select,
        (Some("INSERT"), _) => StatementKind::Insert,
        (Some("UPDATE"), _) => StatementKind::Update,
        (Some("DELETE"), _) => StatementKind::Delete,
        (Some("CREATE"), Some("TABLE")) => StatementKind::CreateTable,
        (Some("CREATE"), Some("DATABASE" | "SCHEMA")) => StatementKind::CreateDatabase,
        (Some("ALTER"), Some("TABLE")) => StatementKind::AlterTable,
        (Some("DROP"), Some("TABLE")) => StatementKind::DropTable,
        (Some("DROP"), Some("DATABASE" | "SCHEMA")) => StatementKind::DropDatabase,
        (Some("TRUNCATE"), _) => StatementKind::Truncate,
        (Some("SHOW"), _) => StatementKind::Show,
        (Some("DESC" | "DESCRIBE"), _) => StatementKind::Describe,
        (Some("EXPLAIN"), _) => StatementKind::Explain,
        (Some("USE"), _) => StatementKind::Use,
        _ => StatementKind::Unknown,
    }
}

/// Verbs that can follow a `WITH` prefix. All are reserved words, so an
/// unquoted CTE name never matches one.
const CTE_BODY_VERBS: [&str; 4] = ["SELECT", "INSERT", "UPDATE", "DELETE"];

/// Tokens from the statement's own verb onwards. A leading
/// `WITH [RECURSIVE] name [(cols)] AS (...) [, ...]` is skipped: CTE bodies
/// and column lists sit at depth > 0, leaving only names and `AS` at depth 0.
fn main_clause(tokens: &[Token]) -> &[Token] {
    if !tokens.first().is_some_and(|token| token.word == "WITH") {
        return tokens;
    }
    tokens
        .iter()
        .position(|token| token.depth == 0 && CTE_BODY_VERBS.contains(&token.word.as_str()))
        .map_or(&tokens[tokens.len()..], |verb| &tokens[verb..])
}

fn assess_statement(statement: &str) -> StatementAssessment {
    let tokens = tokenize(statement);
    let clause = main_clause(&tokens);
    StatementAssessment {
        sql: statement.to_string(),
        kind: kind_of(clause),
        danger: detect_danger(clause),
    }
}

fn detect_danger(tokens: &[Token]) -> Option<DangerKind> {
    let first = tokens.first()?.word.as_str();
    let second = tokens.get(1).map(|token| token.word.as_str());
    let has_top_level = |word: &str| {
        tokens
            .iter()
            .any(|token| token.depth == 0 && token.word == word)
    };

    match (first, second) {
        ("DELETE", _) if !has_top_level("WHERE") => Some(DangerKind::DeleteWithoutWhere),
        ("UPDATE", _) if has_top_level("SET") && !has_top_level("WHERE") => {
            Some(DangerKind::UpdateWithoutWhere)
        }
        ("TRUNCATE", _) => Some(DangerKind::Truncate),
        ("DROP", Some("TABLE")) => Some(DangerKind::DropTable),
        ("DROP", Some("DATABASE" | "SCHEMA")) => Some(DangerKind::DropDatabase),
        _ => None,
    }
}

fn ddl_keyword(statement: &str) -> Option<&'static str> {
    match main_clause(&tokenize(statement)).first()?.word.as_str() {
        "CREATE" => Some("CREATE"),
        "ALTER" => Some("ALTER"),
        "DROP" => Some("DROP"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    word: String,
    depth: usize,
}

/// Uppercased bare words with their parenthesis depth. Quoted text is
/// skipped, so keywords inside literals or quoted identifiers never match.
fn tokenize(statement: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut depth = 0_usize;
    let mut chars = statement.chars();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(open) = quote {
            if ch == '\\' && open != '`' {
                chars.next();
            } else if ch == open {
                quote = None;
            }
            continue;
        }

        if ch.is_alphanumeric() || ch == '_' || ch == '$' {
            word.push(ch.to_ascii_uppercase());
            continue;
        }

        flush_word(&mut tokens, &mut word, depth);
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    flush_word(&mut tokens, &mut word, depth);
    tokens
}

fn flush_word(tokens: &mut Vec<Token>, word: &mut String, depth: usize) {
    if !word.is_empty() {
        tokens.push(Token {
            word: std::mem::take(word),
            depth,
        });
    }
}
