//! The catalog: a well-known tree listing every user table.
//!
//! The catalog is itself a table with a fixed schema, rooted at page
//! 1 forever. Each row records a table's name, root page, the SQL
//! text it was created from, and its schema serialized as a JSON
//! blob. Names are not the tree key, so name lookups are linear
//! scans; catalogs are small.

use log::debug;

use crate::btree::Tree;
use crate::error::{Result, StorageError};
use crate::record::{Column, DataType, Schema, Value, deserialize_record, serialize_record};
use crate::storage::Pager;
use crate::types::PageNum;

/// Schema of the catalog tree's own rows.
pub fn catalog_schema() -> Schema {
    Schema::new(vec![
        Column::new("pkey", DataType::Integer).primary(),
        Column::new("name", DataType::Text).not_null(),
        Column::new("root_page", DataType::Integer).not_null(),
        Column::new("sql_text", DataType::Text),
        Column::new("schema_blob", DataType::Blob).not_null(),
    ])
    .expect("catalog schema is well-formed")
}

/// One catalog row, decoded.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub pkey: i32,
    pub name: String,
    pub root_page: PageNum,
    pub sql_text: String,
    pub schema: Schema,
}

impl TableInfo {
    fn from_values(values: &[Value]) -> Result<Self> {
        let bad = || StorageError::schema_mismatch("malformed catalog row");
        let pkey = values.first().and_then(Value::as_integer).ok_or_else(bad)?;
        let name = values.get(1).and_then(Value::as_text).ok_or_else(bad)?;
        let root = values.get(2).and_then(Value::as_integer).ok_or_else(bad)?;
        let sql_text = match values.get(3) {
            Some(Value::Text(s)) => s.clone(),
            Some(Value::Null) => String::new(),
            _ => return Err(bad()),
        };
        let blob = values.get(4).and_then(Value::as_blob).ok_or_else(bad)?;
        Ok(Self {
            pkey,
            name: name.to_string(),
            root_page: PageNum::new(root as u32),
            sql_text,
            schema: Schema::from_blob(blob)?,
        })
    }

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            Value::Integer(self.pkey),
            Value::Text(self.name.clone()),
            Value::Integer(self.root_page.value() as i32),
            Value::Text(self.sql_text.clone()),
            Value::Blob(self.schema.to_blob()?),
        ])
    }
}

/// Operations on the catalog tree.
pub struct Catalog;

impl Catalog {
    /// Every registered table, in pkey order.
    pub fn all_tables(pager: &mut Pager) -> Result<Vec<TableInfo>> {
        let schema = catalog_schema();
        let mut cursor = Tree::new(pager, PageNum::CATALOG_ROOT).cursor_start()?;
        let rows = cursor.collect_remaining()?;
        rows.iter()
            .map(|(_, record)| {
                let values = deserialize_record(&schema, record)?;
                TableInfo::from_values(&values)
            })
            .collect()
    }

    /// Find a table by name.
    pub fn lookup(pager: &mut Pager, name: &str) -> Result<Option<TableInfo>> {
        Ok(Self::all_tables(pager)?.into_iter().find(|t| t.name == name))
    }

    /// Insert a catalog row for a new table.
    pub fn register(
        pager: &mut Pager,
        name: &str,
        root_page: PageNum,
        sql_text: &str,
        schema: &Schema,
    ) -> Result<TableInfo> {
        let pkey = Self::all_tables(pager)?
            .iter()
            .map(|t| t.pkey)
            .max()
            .unwrap_or(0)
            + 1;
        let info = TableInfo {
            pkey,
            name: name.to_string(),
            root_page,
            sql_text: sql_text.to_string(),
            schema: schema.clone(),
        };
        let record = serialize_record(&catalog_schema(), &info.to_values()?)?;
        Tree::new(pager, PageNum::CATALOG_ROOT).insert(pkey, &record)?;
        debug!("registered table {:?} rooted at page {}", name, root_page);
        Ok(info)
    }

    /// Remove a table's catalog row.
    pub fn deregister(pager: &mut Pager, pkey: i32) -> Result<()> {
        Tree::new(pager, PageNum::CATALOG_ROOT).delete(pkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer).primary(),
            Column::new("name", DataType::Text),
        ])
        .unwrap()
    }

    #[test]
    fn test_register_and_lookup() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(&dir.path().join("test.db"))?;

        let root = pager.allocate_page()?;
        {
            let page = pager.get_page_mut(root)?;
            page.init_leaf();
            page.set_is_root(true);
        }
        let info = Catalog::register(
            &mut pager,
            "fruits",
            root,
            "create table fruits (id integer primary key, name text)",
            &schema(),
        )?;
        assert_eq!(info.pkey, 1);

        let found = Catalog::lookup(&mut pager, "fruits")?.unwrap();
        assert_eq!(found.root_page, root);
        assert_eq!(found.schema.len(), 2);
        assert!(found.sql_text.starts_with("create table"));

        assert!(Catalog::lookup(&mut pager, "veggies")?.is_none());
        Ok(())
    }

    #[test]
    fn test_pkeys_are_assigned_in_sequence() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(&dir.path().join("test.db"))?;

        for name in ["a", "b", "c"] {
            let root = pager.allocate_page()?;
            {
                let page = pager.get_page_mut(root)?;
                page.init_leaf();
                page.set_is_root(true);
            }
            Catalog::register(&mut pager, name, root, "", &schema())?;
        }
        let tables = Catalog::all_tables(&mut pager)?;
        let pkeys: Vec<i32> = tables.iter().map(|t| t.pkey).collect();
        assert_eq!(pkeys, vec![1, 2, 3]);

        // Dropping the middle table does not re-issue its pkey.
        Catalog::deregister(&mut pager, 2)?;
        let root = pager.allocate_page()?;
        {
            let page = pager.get_page_mut(root)?;
            page.init_leaf();
            page.set_is_root(true);
        }
        let info = Catalog::register(&mut pager, "d", root, "", &schema())?;
        assert_eq!(info.pkey, 4);
        Ok(())
    }

    #[test]
    fn test_catalog_survives_reopen() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut pager = Pager::open(&path)?;
            let root = pager.allocate_page()?;
            {
                let page = pager.get_page_mut(root)?;
                page.init_leaf();
                page.set_is_root(true);
            }
            Catalog::register(&mut pager, "fruits", root, "sql", &schema())?;
            pager.close()?;
        }

        let mut pager = Pager::open(&path)?;
        let found = Catalog::lookup(&mut pager, "fruits")?.unwrap();
        assert_eq!(found.name, "fruits");
        assert_eq!(found.schema.columns()[1].name, "name");
        Ok(())
    }
}
