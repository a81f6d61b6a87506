//! MySQL database and user provisioning
//!
//! Statements go to the `mysql` client on stdin, so passwords never show
//! up in a process listing. An existing user is left as is: privileges of
//! a user that already exists are not compared or corrected.

use std::fmt;

use super::{Action, Reconciler, command_failed, mismatch};
use crate::context::ApplyContext;
use crate::error::{ParamError, ProbeError, ReconcileError, TaskError};
use crate::probe::{MysqlClient, ProbedState, is_identifier, sql_literal};
use crate::secrets::Secret;
use crate::transport::Transport;
use crate::types::Params;

fn client(params: &Params) -> Result<MysqlClient, ParamError> {
    Ok(MysqlClient {
        login_user: params.opt_str("login_user")?,
    })
}

fn identifier(params: &Params, key: &str) -> Result<String, ParamError> {
    let value = params.str(key)?;
    if !is_identifier(&value) {
        return Err(ParamError::Invalid {
            key: key.to_string(),
            reason: format!("{value:?} is not a plain identifier"),
        });
    }
    Ok(value)
}

fn run_sql(
    client: &MysqlClient,
    transport: &dyn Transport,
    sql: String,
) -> Result<(), ReconcileError> {
    let cmd = client.command().stdin(sql);
    let output = transport.exec(&cmd)?;
    if output.success() {
        Ok(())
    } else {
        Err(command_failed(&cmd, &output))
    }
}

// ============================================================================
// Database existence
// ============================================================================

/// Parameters: `name`, optional `encoding` and `login_user`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbCreateReconciler {
    pub name: String,
    pub encoding: Option<String>,
    pub client: MysqlClient,
}

impl DbCreateReconciler {
    pub fn from_params(params: &Params) -> Result<Self, ParamError> {
        let encoding = match params.opt_str("encoding")? {
            Some(e) if !is_identifier(&e) => {
                return Err(ParamError::Invalid {
                    key: "encoding".to_string(),
                    reason: format!("{e:?} is not a character set name"),
                });
            }
            other => other,
        };
        Ok(Self {
            name: identifier(params, "name")?,
            encoding,
            client: client(params)?,
        })
    }

    fn statement(&self) -> String {
        match &self.encoding {
            Some(charset) => format!("CREATE DATABASE `{}` CHARACTER SET {charset};", self.name),
            None => format!("CREATE DATABASE `{}`;", self.name),
        }
    }
}

impl Reconciler for DbCreateReconciler {
    fn describe(&self) -> String {
        format!("database {}", self.name)
    }

    fn probe(&self, transport: &dyn Transport) -> Result<ProbedState, ProbeError> {
        Ok(ProbedState::Database {
            exists: self.client.database_exists(transport, &self.name)?,
        })
    }

    fn plan(&self, probed: &ProbedState) -> Result<Action, ReconcileError> {
        let ProbedState::Database { exists } = probed else {
            return Err(mismatch("database", probed));
        };
        Ok(if *exists {
            Action::NoOp {
                detail: format!("database {} exists", self.name),
            }
        } else {
            Action::Apply {
                summary: format!("create database {}", self.name),
            }
        })
    }

    fn apply(
        &self,
        transport: &dyn Transport,
        _probed: &ProbedState,
    ) -> Result<String, ReconcileError> {
        run_sql(&self.client, transport, self.statement())?;
        Ok(format!("created database {}", self.name))
    }
}

// ============================================================================
// User and grants
// ============================================================================

/// One `object:PRIV,PRIV` entry, e.g. `wordpress.*:ALL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub database: String,
    pub table: String,
    pub privileges: Vec<String>,
}

impl Grant {
    /// Parse `db.table:PRIV[,PRIV...]` entries separated by `/`
    pub fn parse_list(spec: &str) -> Result<Vec<Self>, ParamError> {
        let invalid = |reason: String| ParamError::Invalid {
            key: "privileges".to_string(),
            reason,
        };

        spec.split('/')
            .filter(|s| !s.trim().is_empty())
            .map(|entry| {
                let (object, privs) = entry
                    .trim()
                    .split_once(':')
                    .ok_or_else(|| invalid(format!("{entry:?} is missing `:`")))?;
                let (database, table) = object
                    .split_once('.')
                    .ok_or_else(|| invalid(format!("{object:?} must be db.table")))?;
                for part in [database, table] {
                    if part != "*" && !is_identifier(part) {
                        return Err(invalid(format!("{part:?} is not an identifier")));
                    }
                }

                let privileges: Vec<String> = privs
                    .split(',')
                    .map(|p| p.trim().to_ascii_uppercase())
                    .filter(|p| !p.is_empty())
                    .collect();
                if privileges.is_empty() {
                    return Err(invalid(format!("{entry:?} lists no privileges")));
                }
                if let Some(bad) = privileges
                    .iter()
                    .find(|p| !p.chars().all(|c| c.is_ascii_uppercase() || c == ' ' || c == '_'))
                {
                    return Err(invalid(format!("{bad:?} is not a privilege")));
                }

                Ok(Self {
                    database: database.to_string(),
                    table: table.to_string(),
                    privileges,
                })
            })
            .collect()
    }

    fn object(&self) -> String {
        let quote = |s: &str| {
            if s == "*" {
                s.to_string()
            } else {
                format!("`{s}`")
            }
        };
        format!("{}.{}", quote(&self.database), quote(&self.table))
    }

    fn statement(&self, account: &str) -> String {
        let privs: Vec<String> = self
            .privileges
            .iter()
            .map(|p| if p == "ALL" { "ALL PRIVILEGES".to_string() } else { p.clone() })
            .collect();
        format!("GRANT {} ON {} TO {account};", privs.join(", "), self.object())
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}:{}",
            self.database,
            self.table,
            self.privileges.join(",")
        )
    }
}

/// Parameters: `user`, `password_ref` (secret reference), `privileges`
/// (`db.*:ALL/other.*:SELECT`), `host_pattern` (default `localhost`),
/// optional `login_user`
#[derive(Debug, Clone)]
pub struct DbUserGrantReconciler {
    pub user: String,
    pub host_pattern: String,
    pub password: Secret,
    pub grants: Vec<Grant>,
    pub client: MysqlClient,
}

impl DbUserGrantReconciler {
    pub fn from_params(params: &Params, ctx: &ApplyContext) -> Result<Self, TaskError> {
        let user = params.str("user")?;
        let host_pattern = params
            .opt_str("host_pattern")?
            .unwrap_or_else(|| "localhost".to_string());
        for (key, value) in [("user", &user), ("host_pattern", &host_pattern)] {
            if value.is_empty() || value.len() > 255 || value.contains(['\'', '\\', '\0']) {
                return Err(ParamError::Invalid {
                    key: key.to_string(),
                    reason: "contains characters not allowed in an account name".to_string(),
                }
                .into());
            }
        }

        let grants = match params.opt_str("privileges")? {
            Some(spec) => Grant::parse_list(&spec)?,
            None => Vec::new(),
        };
        let password = ctx.resolve_secret("password_ref", &params.str("password_ref")?)?;

        Ok(Self {
            user,
            host_pattern,
            password,
            grants,
            client: client(params)?,
        })
    }

    fn account(&self) -> String {
        format!("{}@{}", sql_literal(&self.user), sql_literal(&self.host_pattern))
    }

    fn statements(&self) -> String {
        let account = self.account();
        let mut sql = format!(
            "CREATE USER {account} IDENTIFIED BY {};\n",
            sql_literal(self.password.expose())
        );
        for grant in &self.grants {
            sql.push_str(&grant.statement(&account));
            sql.push('\n');
        }
        sql.push_str("FLUSH PRIVILEGES;\n");
        sql
    }
}

impl Reconciler for DbUserGrantReconciler {
    fn describe(&self) -> String {
        format!("database user {}@{}", self.user, self.host_pattern)
    }

    fn probe(&self, transport: &dyn Transport) -> Result<ProbedState, ProbeError> {
        Ok(ProbedState::DatabaseUser {
            exists: self
                .client
                .user_exists(transport, &self.user, &self.host_pattern)?,
        })
    }

    fn plan(&self, probed: &ProbedState) -> Result<Action, ReconcileError> {
        let ProbedState::DatabaseUser { exists } = probed else {
            return Err(mismatch("database user", probed));
        };
        Ok(if *exists {
            Action::NoOp {
                detail: format!(
                    "user {}@{} exists (privileges not compared)",
                    self.user, self.host_pattern
                ),
            }
        } else {
            let grants: Vec<String> = self.grants.iter().map(Grant::to_string).collect();
            Action::Apply {
                summary: if grants.is_empty() {
                    format!("create user {}@{}", self.user, self.host_pattern)
                } else {
                    format!(
                        "create user {}@{} and grant {}",
                        self.user,
                        self.host_pattern,
                        grants.join(" ")
                    )
                },
            }
        })
    }

    fn apply(
        &self,
        transport: &dyn Transport,
        _probed: &ProbedState,
    ) -> Result<String, ReconcileError> {
        run_sql(&self.client, transport, self.statements())?;
        Ok(format!(
            "created user {}@{} with {} grant(s)",
            self.user,
            self.host_pattern,
            self.grants.len()
        ))
    }
}
