//! Safety guards gating every read query, write, and simulated action.
//!
//! Each `validate_*` function either returns `Ok(())` or a typed
//! [`SafetyViolation`]. Callers must handle the result; there is no
//! optional or decorator-style path around these checks.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::store::table;

// ---------------------------------------------------------------------------
// Violation type
// ---------------------------------------------------------------------------

/// Category of a safety violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// Query is not read-only or looks like an injection.
    DangerousSql,
    /// Dangerous action requested outside simulation.
    UnsafeAction,
    /// Direct execution against the database.
    DirectExecution,
    /// Operating system command.
    OsCommand,
    /// Real connection termination.
    ConnectionKill,
    /// Write outside the allow-list.
    UnauthorizedWrite,
}

impl ViolationKind {
    /// Upper-case label used in messages and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DangerousSql => "DANGEROUS_SQL",
            Self::UnsafeAction => "UNSAFE_ACTION",
            Self::DirectExecution => "DIRECT_EXECUTION",
            Self::OsCommand => "OS_COMMAND",
            Self::ConnectionKill => "CONNECTION_KILL",
            Self::UnauthorizedWrite => "UNAUTHORIZED_WRITE",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A disallowed operation was attempted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("SAFETY VIOLATION [{kind}]: {message}")]
pub struct SafetyViolation {
    /// Violation category.
    pub kind: ViolationKind,
    /// Human-readable description.
    pub message: String,
    /// Structured details for the audit log.
    pub context: serde_json::Value,
}

impl SafetyViolation {
    fn new(kind: ViolationKind, message: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            kind,
            message: message.into(),
            context,
        }
    }
}

// ---------------------------------------------------------------------------
// Allow- and deny-lists
// ---------------------------------------------------------------------------

/// Statements a read query may start with.
pub const READ_OPERATIONS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "EXPLAIN"];

/// Keywords that are never allowed anywhere in a read query.
pub const DANGEROUS_SQL_KEYWORDS: &[&str] = &[
    "DROP",
    "DELETE",
    "TRUNCATE",
    "ALTER",
    "CREATE",
    "KILL",
    "SHUTDOWN",
    "RESTART",
    "FLUSH",
    "RESET",
    "GRANT",
    "REVOKE",
    "SET GLOBAL",
    "SET SESSION",
    "LOAD DATA",
    "SELECT INTO OUTFILE",
    "LOAD_FILE",
];

/// Actions that may only ever be simulated.
pub const DANGEROUS_ACTIONS: &[&str] = &[
    "KILL_CONNECTION",
    "ROLLBACK_TRANSACTION",
    "RETRY_OPERATION",
    "RESTART_SERVICE",
    "FLUSH_TABLES",
    "RESET_SLAVE",
];

/// OS commands listed in the safety report. No OS command is ever allowed.
pub const DANGEROUS_OS_COMMANDS: &[&str] = &[
    "rm", "del", "format", "fdisk", "mkfs", "dd", "kill", "killall", "pkill", "shutdown",
    "reboot", "systemctl", "service", "net stop", "net start",
];

/// Tables and the write operations permitted on them.
pub const WRITE_ALLOW_LIST: &[(&str, &[&str])] = &[
    (table::DECISION_LOG, &["INSERT"]),
    (table::HEALING_ACTIONS, &["INSERT"]),
    (table::ADMIN_REVIEWS, &["INSERT", "UPDATE"]),
    (table::LEARNING_HISTORY, &["INSERT"]),
];

/// Tables that are never written.
pub const FORBIDDEN_WRITE_TABLES: &[&str] = &[table::DETECTED_ISSUES, "ai_analysis"];

const INJECTION_PATTERNS: &[&str] = &[
    r";\s*(DROP|DELETE|TRUNCATE|ALTER)",
    r"UNION\s+SELECT",
    r"--\s*$",
    r"/\*.*\*/",
    r"'\s*OR\s*'",
    r"'\s*AND\s*'",
];

static INJECTION_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    INJECTION_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok().map(|re| (*p, re)))
        .collect()
});

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// Validate that a query is read-only and free of injection patterns.
///
/// # Errors
///
/// Returns [`ViolationKind::DangerousSql`] if the query is empty, does not
/// start with an allowed read operation, contains a dangerous keyword, or
/// matches an injection heuristic.
pub fn validate_read_query(query: &str) -> Result<(), SafetyViolation> {
    let upper = query.trim().to_uppercase();
    let preview: String = query.trim().chars().take(100).collect();

    if upper.is_empty() {
        return Err(SafetyViolation::new(
            ViolationKind::DangerousSql,
            "Invalid or empty SQL query",
            serde_json::json!({ "query": query }),
        ));
    }

    if !READ_OPERATIONS.iter().any(|op| upper.starts_with(op)) {
        return Err(SafetyViolation::new(
            ViolationKind::DangerousSql,
            format!("Query must start with one of: {}", READ_OPERATIONS.join(", ")),
            serde_json::json!({ "query": preview, "allowed_operations": READ_OPERATIONS }),
        ));
    }

    if let Some(keyword) = DANGEROUS_SQL_KEYWORDS.iter().find(|k| upper.contains(*k)) {
        return Err(SafetyViolation::new(
            ViolationKind::DangerousSql,
            format!("Query contains dangerous keyword: {keyword}"),
            serde_json::json!({ "query": preview, "dangerous_keyword": keyword }),
        ));
    }

    if let Some((pattern, _)) = INJECTION_REGEXES.iter().find(|(_, re)| re.is_match(&upper)) {
        return Err(SafetyViolation::new(
            ViolationKind::DangerousSql,
            "Query contains potential SQL injection pattern",
            serde_json::json!({ "query": preview, "pattern": pattern }),
        ));
    }

    debug!(query = %preview, "read query validated");
    Ok(())
}

/// Validate a write against the allow-list.
///
/// # Errors
///
/// Returns [`ViolationKind::UnauthorizedWrite`] for any write to a forbidden
/// table, to a table outside the allow-list, or with an operation the table
/// does not permit.
pub fn validate_write(operation: &str, target_table: &str) -> Result<(), SafetyViolation> {
    if FORBIDDEN_WRITE_TABLES.contains(&target_table) {
        return Err(SafetyViolation::new(
            ViolationKind::UnauthorizedWrite,
            format!("Write operations forbidden on {target_table} table"),
            serde_json::json!({ "operation": operation, "table": target_table }),
        ));
    }

    let Some((_, allowed)) = WRITE_ALLOW_LIST.iter().find(|(t, _)| *t == target_table) else {
        return Err(SafetyViolation::new(
            ViolationKind::UnauthorizedWrite,
            format!("Write operations not authorized for table: {target_table}"),
            serde_json::json!({ "operation": operation, "table": target_table }),
        ));
    };

    if !allowed.contains(&operation) {
        return Err(SafetyViolation::new(
            ViolationKind::UnauthorizedWrite,
            format!("Operation '{operation}' not authorized for table '{target_table}'"),
            serde_json::json!({
                "operation": operation,
                "table": target_table,
                "authorized": allowed,
            }),
        ));
    }

    debug!(operation, table = target_table, "write validated");
    Ok(())
}

/// Validate that a healing action is only ever simulated when dangerous.
///
/// Modes are compared exactly; nothing is coerced to SIMULATED.
///
/// # Errors
///
/// Returns [`ViolationKind::ConnectionKill`] for a non-simulated
/// KILL_CONNECTION and [`ViolationKind::UnsafeAction`] for any other
/// dangerous action that is not simulated.
pub fn validate_healing_action(
    action_type: &str,
    execution_mode: &str,
) -> Result<(), SafetyViolation> {
    let simulated = execution_mode == "SIMULATED";

    if action_type == "KILL_CONNECTION" && !simulated {
        return Err(SafetyViolation::new(
            ViolationKind::ConnectionKill,
            "Connection termination must be simulated only",
            serde_json::json!({ "action_type": action_type, "execution_mode": execution_mode }),
        ));
    }

    if DANGEROUS_ACTIONS.contains(&action_type) && !simulated {
        return Err(SafetyViolation::new(
            ViolationKind::UnsafeAction,
            format!("Dangerous action '{action_type}' must be SIMULATED, got '{execution_mode}'"),
            serde_json::json!({ "action_type": action_type, "execution_mode": execution_mode }),
        ));
    }

    debug!(action_type, execution_mode, "healing action validated");
    Ok(())
}

/// OS commands are never permitted.
///
/// # Errors
///
/// Always returns [`ViolationKind::OsCommand`].
pub fn validate_os_command(command: &str) -> Result<(), SafetyViolation> {
    Err(SafetyViolation::new(
        ViolationKind::OsCommand,
        format!("OS command execution is strictly forbidden: {command}"),
        serde_json::json!({ "command": command }),
    ))
}

/// Direct execution against the database is never permitted.
///
/// # Errors
///
/// Always returns [`ViolationKind::DirectExecution`].
pub fn validate_direct_execution(operation: &str) -> Result<(), SafetyViolation> {
    Err(SafetyViolation::new(
        ViolationKind::DirectExecution,
        format!("Direct execution forbidden: {operation}"),
        serde_json::json!({ "operation": operation }),
    ))
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Which protections are active.
#[derive(Debug, Clone, Serialize)]
pub struct ProtectionLevels {
    /// Injection heuristics applied to read queries.
    pub sql_injection_protection: bool,
    /// Dangerous keywords blocked in read queries.
    pub dangerous_keyword_blocking: bool,
    /// Healing actions validated before persistence.
    pub action_execution_validation: bool,
    /// OS commands blocked.
    pub os_command_blocking: bool,
    /// Writes restricted to the allow-list.
    pub unauthorized_write_prevention: bool,
    /// Direct execution blocked.
    pub direct_execution_prevention: bool,
}

/// Operations the guards authorize.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizedOperations {
    /// Allowed leading statements for reads.
    pub sql_read_operations: Vec<&'static str>,
    /// Tables that accept writes.
    pub authorized_write_tables: Vec<&'static str>,
    /// Tables that never accept writes.
    pub forbidden_write_tables: Vec<&'static str>,
    /// Actions that may only be simulated.
    pub simulation_only_actions: Vec<&'static str>,
}

/// Static description of the active guards.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyReport {
    /// When the report was produced.
    pub generated_at: String,
    /// Always true; the guards cannot be disabled.
    pub safety_guards_active: bool,
    /// Number of blocked SQL keywords.
    pub dangerous_sql_keywords: usize,
    /// Number of simulation-only actions.
    pub dangerous_actions: usize,
    /// Number of listed OS commands.
    pub dangerous_os_commands: usize,
    /// Active protections.
    pub protection_levels: ProtectionLevels,
    /// Authorized operations.
    pub authorized_operations: AuthorizedOperations,
    /// Guarantees the pipeline upholds.
    pub safety_guarantees: Vec<&'static str>,
}

/// Describe the active guards.
pub fn safety_report() -> SafetyReport {
    SafetyReport {
        generated_at: crate::store::now_timestamp(),
        safety_guards_active: true,
        dangerous_sql_keywords: DANGEROUS_SQL_KEYWORDS.len(),
        dangerous_actions: DANGEROUS_ACTIONS.len(),
        dangerous_os_commands: DANGEROUS_OS_COMMANDS.len(),
        protection_levels: ProtectionLevels {
            sql_injection_protection: true,
            dangerous_keyword_blocking: true,
            action_execution_validation: true,
            os_command_blocking: true,
            unauthorized_write_prevention: true,
            direct_execution_prevention: true,
        },
        authorized_operations: AuthorizedOperations {
            sql_read_operations: READ_OPERATIONS.to_vec(),
            authorized_write_tables: WRITE_ALLOW_LIST.iter().map(|(t, _)| *t).collect(),
            forbidden_write_tables: FORBIDDEN_WRITE_TABLES.to_vec(),
            simulation_only_actions: DANGEROUS_ACTIONS.to_vec(),
        },
        safety_guarantees: vec![
            "No direct database mutations on detected_issues",
            "All dangerous actions are simulated only",
            "No OS command execution allowed",
            "SQL injection protection active",
            "Unauthorized write operations blocked",
            "Connection termination simulated only",
        ],
    }
}
