use crate::types::TransactionState;

/// How a statement affects the connection's transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Begin,
    Commit,
    Rollback,
    Other,
}

impl StatementKind {
    pub fn classify(statement: &str) -> Self {
        let mut words = leading_words(statement);
        let first = words.next().unwrap_or_default();

        match first.as_str() {
            "BEGIN" => StatementKind::Begin,
            "START" if words.next().as_deref() == Some("TRANSACTION") => StatementKind::Begin,
            "COMMIT" | "END" => StatementKind::Commit,
            // ROLLBACK TO SAVEPOINT keeps the transaction open
            "ROLLBACK" if words.next().as_deref() == Some("TO") => StatementKind::Other,
            "ROLLBACK" | "ABORT" => StatementKind::Rollback,
            _ => StatementKind::Other,
        }
    }

    /// State after this statement succeeds.
    pub fn next_state(self, current: TransactionState, autocommit: bool) -> TransactionState {
        match self {
            StatementKind::Begin => TransactionState::Open,
            StatementKind::Commit | StatementKind::Rollback => TransactionState::None,
            // a failed COMMIT stays pending until the caller rolls back
            StatementKind::Other if autocommit || current == TransactionState::CommitPending => current,
            StatementKind::Other => TransactionState::Open,
        }
    }
}

/// Upper-cased words after leading whitespace and comments.
fn leading_words(statement: &str) -> impl Iterator<Item = String> + '_ {
    let mut rest = statement.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("").trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, tail)| tail).unwrap_or("").trim_start();
        } else {
            break;
        }
    }

    rest.split(|c: char| c.is_whitespace() || c == ';' || c == '(')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(StatementKind::classify("BEGIN"), StatementKind::Begin);
        assert_eq!(StatementKind::classify("start transaction isolation level serializable"), StatementKind::Begin);
        assert_eq!(StatementKind::classify("commit;"), StatementKind::Commit);
        assert_eq!(StatementKind::classify("END"), StatementKind::Commit);
        assert_eq!(StatementKind::classify("  rollback"), StatementKind::Rollback);
        assert_eq!(StatementKind::classify("ROLLBACK TO SAVEPOINT sp1"), StatementKind::Other);
        assert_eq!(StatementKind::classify("SELECT 1"), StatementKind::Other);
        assert_eq!(StatementKind::classify(""), StatementKind::Other);
    }

    #[test]
    fn test_leading_comments_are_skipped() {
        assert_eq!(
            StatementKind::classify("-- audit\n/* tx */ COMMIT"),
            StatementKind::Commit
        );
    }

    #[test]
    fn test_start_without_transaction_is_other() {
        assert_eq!(StatementKind::classify("START REPLICA"), StatementKind::Other);
    }

    #[test]
    fn test_next_state_respects_autocommit() {
        let insert = StatementKind::classify("INSERT INTO t VALUES (1)");
        assert_eq!(insert.next_state(TransactionState::None, true), TransactionState::None);
        assert_eq!(insert.next_state(TransactionState::None, false), TransactionState::Open);
        assert_eq!(insert.next_state(TransactionState::Open, true), TransactionState::Open);

        let begin = StatementKind::classify("BEGIN");
        assert_eq!(begin.next_state(TransactionState::None, true), TransactionState::Open);

        assert_eq!(
            insert.next_state(TransactionState::CommitPending, false),
            TransactionState::CommitPending
        );

        let commit = StatementKind::classify("COMMIT");
        assert_eq!(commit.next_state(TransactionState::Open, false), TransactionState::None);
    }
}
