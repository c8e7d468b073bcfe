//! SQL rendering of the index tables for relational deployments.
//!
//! The in-memory indexes in this crate are the reference behaviour. A
//! relational deployment stores the same rows in the tables rendered here;
//! the commit statements reproduce [`ShadowIndex::commit`] one step at a
//! time.
//!
//! [`ShadowIndex::commit`]: crate::shadow::ShadowIndex::commit

use crate::config::DbPlatform;

/// One of the three shadow-index tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexTable {
    Containment,
    Reference,
    Membership,
}

impl IndexTable {
    pub const ALL: [IndexTable; 3] = [Self::Containment, Self::Reference, Self::Membership];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Containment => "containment",
            Self::Reference => "reference",
            Self::Membership => "membership",
        }
    }

    pub fn operations_table(&self) -> String {
        format!("{}_tx_operations", self.name())
    }

    fn has_proxy(&self) -> bool {
        *self == Self::Membership
    }
}

/// Platform-specific SQL for the index schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SqlDialect {
    platform: DbPlatform,
}

const ROW_KEY: [&str; 4] = ["subject_id", "predicate", "object_id", "source_id"];

impl SqlDialect {
    pub fn new(platform: DbPlatform) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> DbPlatform {
        self.platform
    }

    fn id_type(&self) -> &'static str {
        "varchar(503)"
    }

    fn time_type(&self) -> &'static str {
        match self.platform {
            DbPlatform::H2 | DbPlatform::Postgres => "timestamp",
            DbPlatform::MySql | DbPlatform::MariaDb => "datetime(6)",
        }
    }

    fn if_not_exists_index(&self) -> &'static str {
        match self.platform {
            DbPlatform::MySql => "",
            _ => "IF NOT EXISTS ",
        }
    }

    /// Every `CREATE` statement of the schema, in dependency order.
    pub fn ddl(&self) -> Vec<String> {
        let id = self.id_type();
        let mut out = vec![format!(
            "CREATE TABLE IF NOT EXISTS mapping (resource_id {id} NOT NULL PRIMARY KEY, \
             root_id {id} NOT NULL, store_object_id {id} NOT NULL)"
        )];
        for table in IndexTable::ALL {
            out.extend(self.table_ddl(table));
        }
        out
    }

    fn table_ddl(&self, table: IndexTable) -> Vec<String> {
        let (id, ts) = (self.id_type(), self.time_type());
        let name = table.name();
        let ops = table.operations_table();
        let proxy = if table.has_proxy() {
            format!(", proxy_id {id}")
        } else {
            String::new()
        };
        let columns = format!(
            "subject_id {id} NOT NULL, predicate {id} NOT NULL, object_id {id} NOT NULL, \
             source_id {id} NOT NULL{proxy}, valid_from {ts} NOT NULL, valid_to {ts}, \
             last_updated {ts} NOT NULL"
        );
        let idx = self.if_not_exists_index();
        vec![
            format!("CREATE TABLE IF NOT EXISTS {name} ({columns})"),
            format!(
                "CREATE TABLE IF NOT EXISTS {ops} ({columns}, tx_id varchar(36) NOT NULL, \
                 operation varchar(10) NOT NULL, force_flag boolean NOT NULL DEFAULT false)"
            ),
            format!("CREATE INDEX {idx}{name}_subject_idx ON {name} (subject_id)"),
            format!("CREATE INDEX {idx}{name}_object_idx ON {name} (object_id)"),
            format!("CREATE INDEX {idx}{name}_source_idx ON {name} (source_id)"),
            format!("CREATE INDEX {idx}{ops}_tx_idx ON {ops} (tx_id)"),
        ]
    }

    /// Statements that fold one transaction's operations into `table`, in
    /// execution order. `:tx_id` is the only parameter.
    pub fn commit_statements(&self, table: IndexTable) -> Vec<String> {
        vec![
            self.commit_forced_deletes(table),
            self.commit_deletes(table),
            self.commit_adds(table),
            self.clear_transaction(table),
        ]
    }

    fn commit_forced_deletes(&self, table: IndexTable) -> String {
        let (name, ops) = (table.name(), table.operations_table());
        format!(
            "DELETE FROM {name} WHERE EXISTS (SELECT 1 FROM {ops} o WHERE o.tx_id = :tx_id \
             AND o.operation = 'delete' AND o.force_flag = true AND {} \
             AND o.valid_from = {name}.valid_from)",
            key_match(table, "o", name)
        )
    }

    /// Close committed rows that a non-forced pending delete targets.
    pub fn commit_deletes(&self, table: IndexTable) -> String {
        let (name, ops) = (table.name(), table.operations_table());
        let filter = "o.tx_id = :tx_id AND o.operation = 'delete' AND o.force_flag = false";
        match self.platform {
            DbPlatform::H2 => format!(
                "UPDATE {name} r SET valid_to = (SELECT o.valid_to FROM {ops} o WHERE {filter} AND {keys}) \
                 WHERE r.valid_to IS NULL AND EXISTS (SELECT 1 FROM {ops} o WHERE {filter} AND {keys})",
                keys = key_match(table, "o", "r")
            ),
            DbPlatform::Postgres => format!(
                "UPDATE {name} SET valid_to = o.valid_to FROM {ops} o WHERE {filter} AND {keys} \
                 AND {name}.valid_to IS NULL",
                keys = key_match(table, "o", name)
            ),
            DbPlatform::MySql | DbPlatform::MariaDb => format!(
                "UPDATE {name} r INNER JOIN {ops} o ON {keys} SET r.valid_to = o.valid_to \
                 WHERE {filter} AND r.valid_to IS NULL",
                keys = key_match(table, "o", "r")
            ),
        }
    }

    fn commit_adds(&self, table: IndexTable) -> String {
        let (name, ops) = (table.name(), table.operations_table());
        let columns = if table.has_proxy() {
            "subject_id, predicate, object_id, source_id, proxy_id, valid_from, valid_to, last_updated"
        } else {
            "subject_id, predicate, object_id, source_id, valid_from, valid_to, last_updated"
        };
        format!(
            "INSERT INTO {name} ({columns}) SELECT {columns} FROM {ops} o WHERE o.tx_id = :tx_id \
             AND o.operation = 'add' AND NOT EXISTS (SELECT 1 FROM {name} m WHERE {} \
             AND (m.valid_from = o.valid_from OR (m.valid_to IS NULL AND o.valid_to IS NULL)))",
            key_match(table, "o", "m")
        )
    }

    fn clear_transaction(&self, table: IndexTable) -> String {
        format!("DELETE FROM {} WHERE tx_id = :tx_id", table.operations_table())
    }
}

/// Row identity; membership rows are also keyed by their proxy.
fn key_match(table: IndexTable, left: &str, right: &str) -> String {
    let proxy = table.has_proxy().then_some("proxy_id");
    ROW_KEY
        .iter()
        .copied()
        .chain(proxy)
        .map(|c| format!("{left}.{c} = {right}.{c}"))
        .collect::<Vec<_>>()
        .join(" AND ")
}
