/// Default implementation for a Repository that factors out common
/// query patterns / SQL queries between Postgres and SQLite.
///
/// Usage:
///
/// The struct has to have certain fields, since this macro relies on them:
///
/// ```ignore
/// pub struct MyRepository {
///     pub executor: sqlx::Pool<sqlx::SqlxDatabaseType>
/// }
///
/// impl MyRepository {
///     pub const MIGRATOR: sqlx::Migrator = sqlx::migrate!("my/migrations");
///     pub const QUERIES: RepositoryQueries = RepositoryQueries {
///         begin_transaction: None,
///         dialect: &SQLITE,
///     };
///     pub fn interpret_error(error: sqlx::Error) -> Error {
///         // Interpret the database-specific error code and turn some sqlx errors
///         // into the Error enum values like UniqueConstraintViolation/FKConstraintViolation
///         // ...
///     }
/// }
///
/// implement_repository!(MyRepository, sqlx::SqlxDatabaseType)
/// ```
///
/// The code between PG and SQLite is almost identical, but a `Pool<Any>` or an
/// implementation generic over `sqlx::Database` both run into borrow checker
/// trouble with `QueryBuilder` and `#[async_trait]`
/// (https://github.com/launchbadge/sqlx/issues/1978), so the whole implementation
/// is stamped out per backend instead. This means no compile-time query checking.
///
/// Column positions are always rewritten as a whole: the new order is computed in
/// memory (see `crate::ordering`), every index of the table is first moved out of
/// the way to a negative value, then the final positions `0..n` are written. This
/// never trips the `UNIQUE (table_id, "index")` constraint halfway through.

use crate::query::dialect::SqlDialect;

/// Queries that are different between SQLite and PG
pub struct RepositoryQueries {
    /// Statement run at the start of every multi-statement transaction
    pub begin_transaction: Option<&'static str>,
    pub dialect: &'static SqlDialect,
}

#[macro_export]
macro_rules! implement_repository {
    ($repo: ident, $db: ty) => {
impl $repo {
    async fn begin(&self) -> Result<sqlx::Transaction<'_, $db>, Error> {
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;
        if let Some(statement) = $repo::QUERIES.begin_transaction {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await.map_err($repo::interpret_error)?;
        }
        Ok(tx)
    }

    async fn column_order(
        tx: &mut sqlx::Transaction<'_, $db>,
        table_id: TableId,
    ) -> Result<Vec<ColumnId>, Error> {
        let order: Vec<ColumnId> = sqlx::query_scalar(r#"SELECT id FROM columns WHERE table_id = $1 ORDER BY "index""#)
            .bind(table_id)
            .fetch_all(&mut **tx)
            .await.map_err($repo::interpret_error)?;
        Ok(order)
    }

    async fn write_column_order(
        tx: &mut sqlx::Transaction<'_, $db>,
        table_id: TableId,
        order: &[ColumnId],
    ) -> Result<(), Error> {
        sqlx::query(r#"UPDATE columns SET "index" = -1 - "index" WHERE table_id = $1"#)
            .bind(table_id)
            .execute(&mut **tx)
            .await.map_err($repo::interpret_error)?;

        for (position, column_id) in order.iter().enumerate() {
            sqlx::query(r#"UPDATE columns SET "index" = $1 WHERE id = $2"#)
                .bind(position as i32)
                .bind(column_id)
                .execute(&mut **tx)
                .await.map_err($repo::interpret_error)?;
        }

        Ok(())
    }

    async fn fetch_column(
        tx: &mut sqlx::Transaction<'_, $db>,
        id: ColumnId,
    ) -> Result<ColumnRecord, Error> {
        let column = sqlx::query_as(
            r#"SELECT id, table_id, "index", name, type, properties, created_at, updated_at
            FROM columns WHERE id = $1"#,
        )
        .bind(id)
        .fetch_one(&mut **tx)
        .await.map_err($repo::interpret_error)?;
        Ok(column)
    }

    async fn fetch_columns(
        tx: &mut sqlx::Transaction<'_, $db>,
        table_id: TableId,
    ) -> Result<Vec<ColumnRecord>, Error> {
        let columns = sqlx::query_as(
            r#"SELECT id, table_id, "index", name, type, properties, created_at, updated_at
            FROM columns WHERE table_id = $1 ORDER BY "index""#,
        )
        .bind(table_id)
        .fetch_all(&mut **tx)
        .await.map_err($repo::interpret_error)?;
        Ok(columns)
    }

    async fn insert_column(
        tx: &mut sqlx::Transaction<'_, $db>,
        table_id: TableId,
        column: &NewColumn,
        index: i32,
        now: Timestamp,
    ) -> Result<ColumnId, Error> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO columns (id, table_id, "index", name, type, properties, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)"#,
        )
        .bind(id)
        .bind(table_id)
        .bind(index)
        .bind(&column.name)
        .bind(column.column_type.to_string())
        .bind(Json(&column.properties))
        .bind(now)
        .execute(&mut **tx)
        .await.map_err($repo::interpret_error)?;
        Ok(id)
    }

    fn bind_params<'q>(
        mut query: sqlx::query::Query<'q, $db, <$db as sqlx::Database>::Arguments<'q>>,
        params: &'q [Param],
    ) -> sqlx::query::Query<'q, $db, <$db as sqlx::Database>::Arguments<'q>> {
        for param in params {
            query = match param {
                Param::Uuid(id) => query.bind(*id),
                Param::Json(value) => query.bind(Json(value)),
                Param::Timestamp(timestamp) => query.bind(*timestamp),
                Param::Value(Value::Null) => query.bind(None::<String>),
                Param::Value(Value::Bool(b)) => query.bind(*b),
                Param::Value(Value::Number(n)) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64()),
                },
                Param::Value(Value::String(s)) => query.bind(s.as_str()),
                Param::Value(value) => query.bind(Json(value)),
            };
        }
        query
    }

    /// Decode the `_0.._width` output columns of a record query, picking
    /// the JSON representation from the SQL type of each value.
    fn row_values(row: &<$db as sqlx::Database>::Row, width: usize) -> Result<Vec<Value>, Error> {
        (0..width)
            .map(|i| {
                let raw = row.try_get_raw(i).map_err($repo::interpret_error)?;
                if raw.is_null() {
                    return Ok(Value::Null);
                }
                let type_name = raw.type_info().name().to_uppercase();

                let value = match type_name.as_str() {
                    "INTEGER" | "INT8" | "BIGINT" => Value::from(row.try_get::<i64, _>(i).map_err($repo::interpret_error)?),
                    "INT4" => Value::from(row.try_get::<i32, _>(i).map_err($repo::interpret_error)?),
                    "REAL" | "FLOAT8" => Value::from(row.try_get::<f64, _>(i).map_err($repo::interpret_error)?),
                    "FLOAT4" => Value::from(row.try_get::<f32, _>(i).map_err($repo::interpret_error)?),
                    "BOOL" | "BOOLEAN" => Value::from(row.try_get::<bool, _>(i).map_err($repo::interpret_error)?),
                    "JSON" | "JSONB" => row.try_get::<Json<Value>, _>(i).map_err($repo::interpret_error)?.0,
                    _ => Value::from(row.try_get::<String, _>(i).map_err($repo::interpret_error)?),
                };
                Ok(value)
            })
            .collect()
    }
}

#[async_trait]
impl Repository for $repo {
    async fn setup(&self) {
        $repo::MIGRATOR
            .run(&self.executor)
            .await
            .expect("error running migrations");
    }

    fn dialect(&self) -> &'static SqlDialect {
        $repo::QUERIES.dialect
    }

    async fn create_organization(&self, name: &str) -> Result<OrganizationRecord, Error> {
        let organization = sqlx::query_as(
            r#"INSERT INTO organizations (id, name, created_at, updated_at) VALUES ($1, $2, $3, $3)
            RETURNING id, name, created_at, updated_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(now())
        .fetch_one(&self.executor)
        .await.map_err($repo::interpret_error)?;

        Ok(organization)
    }

    async fn get_organization(
        &self,
        id: OrganizationId,
    ) -> Result<OrganizationRecord, Error> {
        let organization = sqlx::query_as(
            r#"SELECT id, name, created_at, updated_at FROM organizations WHERE id = $1"#,
        )
        .bind(id)
        .fetch_one(&self.executor)
        .await.map_err($repo::interpret_error)?;

        Ok(organization)
    }

    async fn list_organizations(&self) -> Result<Vec<OrganizationRecord>, Error> {
        let organizations = sqlx::query_as(
            r#"SELECT id, name, created_at, updated_at FROM organizations ORDER BY created_at, id"#,
        )
        .fetch(&self.executor)
        .try_collect()
        .await.map_err($repo::interpret_error)?;

        Ok(organizations)
    }

    async fn rename_organization(
        &self,
        id: OrganizationId,
        name: &str,
    ) -> Result<OrganizationRecord, Error> {
        let organization = sqlx::query_as(
            r#"UPDATE organizations SET name = $1, updated_at = $2 WHERE id = $3
            RETURNING id, name, created_at, updated_at"#,
        )
        .bind(name)
        .bind(now())
        .bind(id)
        .fetch_one(&self.executor)
        .await.map_err($repo::interpret_error)?;

        Ok(organization)
    }

    // In the delete methods, return the ID back so that we get an error if the
    // row didn't actually exist
    async fn delete_organization(&self, id: OrganizationId) -> Result<(), Error> {
        sqlx::query("DELETE FROM organizations WHERE id = $1 RETURNING id")
            .bind(id)
            .fetch_one(&self.executor)
            .await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn create_entry(
        &self,
        organization_id: OrganizationId,
        entry_type: EntryType,
        parent_folder_id: Option<EntryId>,
        properties: &Properties,
        columns: &[NewColumn],
    ) -> Result<EntryRecord, Error> {
        let id = Uuid::new_v4();
        let now = now();
        let mut tx = self.begin().await?;

        let entry = sqlx::query_as(
            r#"INSERT INTO table_filesystem_entries
                (id, organization_id, type, parent_folder_id, properties, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING id, organization_id, type, parent_folder_id, properties, created_at, updated_at"#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(entry_type.to_string())
        .bind(parent_folder_id)
        .bind(Json(properties))
        .bind(now)
        .fetch_one(&mut *tx)
        .await.map_err($repo::interpret_error)?;

        let query = match entry_type {
            EntryType::Folder => "INSERT INTO folders (id) VALUES ($1)",
            EntryType::Table => "INSERT INTO tables (id) VALUES ($1)",
        };
        sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .await.map_err($repo::interpret_error)?;

        for (index, column) in columns.iter().enumerate() {
            Self::insert_column(&mut tx, id, column, index as i32, now).await?;
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(entry)
    }

    async fn get_entry(&self, id: EntryId) -> Result<EntryRecord, Error> {
        let entry = sqlx::query_as(
            r#"SELECT id, organization_id, type, parent_folder_id, properties, created_at, updated_at
            FROM table_filesystem_entries WHERE id = $1"#,
        )
        .bind(id)
        .fetch_one(&self.executor)
        .await.map_err($repo::interpret_error)?;

        Ok(entry)
    }

    async fn list_children(
        &self,
        organization_id: OrganizationId,
        parent_folder_id: Option<EntryId>,
        order_by: &str,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<EntryRecord>, i64), Error> {
        fn push_filter<'a>(
            builder: &mut QueryBuilder<'a, $db>,
            organization_id: OrganizationId,
            parent_folder_id: Option<EntryId>,
        ) {
            builder.push(" WHERE e.organization_id = ");
            builder.push_bind(organization_id);
            match parent_folder_id {
                Some(parent_folder_id) => {
                    builder.push(" AND e.parent_folder_id = ");
                    builder.push_bind(parent_folder_id);
                }
                None => {
                    builder.push(" AND e.parent_folder_id IS NULL");
                }
            }
        }

        fn out_of_range(error: std::num::TryFromIntError) -> Error {
            Error::SqlxError(sqlx::Error::Encode(Box::new(error)))
        }

        let mut builder: QueryBuilder<$db> = QueryBuilder::new(
            r#"SELECT e.id, e.organization_id, e.type, e.parent_folder_id, e.properties, e.created_at, e.updated_at
            FROM table_filesystem_entries e"#,
        );
        push_filter(&mut builder, organization_id, parent_folder_id);
        builder.push(" ");
        builder.push(order_by);
        builder.push(" LIMIT ");
        builder.push_bind(i64::try_from(limit).map_err(out_of_range)?);
        builder.push(" OFFSET ");
        builder.push_bind(i64::try_from(offset).map_err(out_of_range)?);

        let entries = builder
            .build_query_as()
            .fetch(&self.executor)
            .try_collect()
            .await.map_err($repo::interpret_error)?;

        let mut builder: QueryBuilder<$db> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM table_filesystem_entries e");
        push_filter(&mut builder, organization_id, parent_folder_id);

        let total: i64 = builder
            .build()
            .fetch_one(&self.executor)
            .await.map_err($repo::interpret_error)?
            .try_get("count").map_err($repo::interpret_error)?;

        Ok((entries, total))
    }

    async fn update_entry_properties(
        &self,
        id: EntryId,
        update: &PropertiesUpdate,
    ) -> Result<EntryRecord, Error> {
        let mut tx = self.begin().await?;

        let mut properties: Json<Properties> =
            sqlx::query_scalar("SELECT properties FROM table_filesystem_entries WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await.map_err($repo::interpret_error)?;
        properties.0.apply(update);

        let entry = sqlx::query_as(
            r#"UPDATE table_filesystem_entries SET properties = $1, updated_at = $2 WHERE id = $3
            RETURNING id, organization_id, type, parent_folder_id, properties, created_at, updated_at"#,
        )
        .bind(properties)
        .bind(now())
        .bind(id)
        .fetch_one(&mut *tx)
        .await.map_err($repo::interpret_error)?;

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(entry)
    }

    async fn move_entry(
        &self,
        id: EntryId,
        parent_folder_id: Option<EntryId>,
    ) -> Result<EntryRecord, Error> {
        let mut tx = self.begin().await?;

        // Write before reading: concurrent moves wait on this lock and then
        // see the committed tree
        let organization_id: OrganizationId = sqlx::query_scalar(
            "UPDATE table_filesystem_entries SET updated_at = $1 WHERE id = $2 RETURNING organization_id",
        )
        .bind(now())
        .bind(id)
        .fetch_one(&mut *tx)
        .await.map_err($repo::interpret_error)?;

        if let Some(destination_id) = parent_folder_id {
            let invalid = |reason| Error::InvalidMove {
                entry_id: id,
                destination_id,
                reason,
            };

            let destination: Option<(OrganizationId, String)> = sqlx::query_as(
                "SELECT organization_id, type FROM table_filesystem_entries WHERE id = $1",
            )
            .bind(destination_id)
            .fetch_optional(&mut *tx)
            .await.map_err($repo::interpret_error)?;

            match destination {
                None => return Err(invalid(InvalidMove::DestinationNotFound)),
                Some((_, entry_type)) if entry_type != EntryType::Folder.to_string() => {
                    return Err(invalid(InvalidMove::NotAFolder))
                }
                Some((destination_organization_id, _))
                    if destination_organization_id != organization_id =>
                {
                    return Err(invalid(InvalidMove::OrganizationMismatch))
                }
                Some(_) => {}
            }

            // Walk up from the destination: meeting the entry on the way means
            // it would become its own ancestor
            let mut visited = std::collections::HashSet::new();
            let mut current = Some(destination_id);
            while let Some(ancestor_id) = current {
                if ancestor_id == id {
                    return Err(invalid(InvalidMove::Cycle));
                }
                if !visited.insert(ancestor_id) {
                    break;
                }
                let parent: Option<Option<EntryId>> = sqlx::query_scalar(
                    "SELECT parent_folder_id FROM table_filesystem_entries WHERE id = $1",
                )
                .bind(ancestor_id)
                .fetch_optional(&mut *tx)
                .await.map_err($repo::interpret_error)?;
                current = parent.flatten();
            }
        }

        let entry = sqlx::query_as(
            r#"UPDATE table_filesystem_entries SET parent_folder_id = $1 WHERE id = $2
            RETURNING id, organization_id, type, parent_folder_id, properties, created_at, updated_at"#,
        )
        .bind(parent_folder_id)
        .bind(id)
        .fetch_one(&mut *tx)
        .await.map_err($repo::interpret_error)?;

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(entry)
    }

    async fn delete_entry(&self, id: EntryId) -> Result<(), Error> {
        sqlx::query("DELETE FROM table_filesystem_entries WHERE id = $1 RETURNING id")
            .bind(id)
            .fetch_one(&self.executor)
            .await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn list_columns(&self, table_id: TableId) -> Result<Vec<ColumnRecord>, Error> {
        let columns = sqlx::query_as(
            r#"SELECT id, table_id, "index", name, type, properties, created_at, updated_at
            FROM columns WHERE table_id = $1 ORDER BY "index""#,
        )
        .bind(table_id)
        .fetch(&self.executor)
        .try_collect()
        .await.map_err($repo::interpret_error)?;

        Ok(columns)
    }

    async fn get_column(&self, id: ColumnId) -> Result<ColumnRecord, Error> {
        let column = sqlx::query_as(
            r#"SELECT id, table_id, "index", name, type, properties, created_at, updated_at
            FROM columns WHERE id = $1"#,
        )
        .bind(id)
        .fetch_one(&self.executor)
        .await.map_err($repo::interpret_error)?;

        Ok(column)
    }

    async fn create_column(
        &self,
        table_id: TableId,
        column: &NewColumn,
        index: Option<usize>,
    ) -> Result<ColumnRecord, Error> {
        let mut tx = self.begin().await?;

        // Append at the tail first, then move it into place
        let order = Self::column_order(&mut tx, table_id).await?;
        let id = Self::insert_column(&mut tx, table_id, column, order.len() as i32, now()).await?;

        let target = ordering::place(&order, id, index);
        if target.last() != Some(&id) {
            Self::write_column_order(&mut tx, table_id, &target).await?;
        }

        let column = Self::fetch_column(&mut tx, id).await?;
        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(column)
    }

    async fn update_column(
        &self,
        id: ColumnId,
        update: &ColumnUpdate,
    ) -> Result<ColumnRecord, Error> {
        let mut tx = self.begin().await?;
        let mut column = Self::fetch_column(&mut tx, id).await?;

        if let Some(name) = &update.name {
            column.name = name.clone();
        }
        if let Some(column_type) = &update.column_type {
            column.r#type = column_type.to_string();
        }
        if let Some(properties) = &update.properties {
            column.properties.0.apply(properties);
        }

        sqlx::query(
            "UPDATE columns SET name = $1, type = $2, properties = $3, updated_at = $4 WHERE id = $5",
        )
        .bind(&column.name)
        .bind(&column.r#type)
        .bind(&column.properties)
        .bind(now())
        .bind(id)
        .execute(&mut *tx)
        .await.map_err($repo::interpret_error)?;

        if update.index.is_some() {
            let order = Self::column_order(&mut tx, column.table_id).await?;
            let target = ordering::place(&order, id, update.index);
            if target != order {
                Self::write_column_order(&mut tx, column.table_id, &target).await?;
            }
        }

        let column = Self::fetch_column(&mut tx, id).await?;
        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(column)
    }

    async fn delete_column(&self, id: ColumnId) -> Result<(), Error> {
        let mut tx = self.begin().await?;

        let table_id: TableId = sqlx::query_scalar("DELETE FROM columns WHERE id = $1 RETURNING table_id")
            .bind(id)
            .fetch_one(&mut *tx)
            .await.map_err($repo::interpret_error)?;

        // Close the gap left behind
        let order = Self::column_order(&mut tx, table_id).await?;
        Self::write_column_order(&mut tx, table_id, &order).await?;

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(())
    }

    async fn reorder_columns(
        &self,
        table_id: TableId,
        column_ids: &[ColumnId],
    ) -> Result<Vec<ColumnRecord>, Error> {
        let mut tx = self.begin().await?;

        let order = Self::column_order(&mut tx, table_id).await?;
        let target = ordering::reorder(&order, column_ids);
        if target != order {
            Self::write_column_order(&mut tx, table_id, &target).await?;
        }

        let columns = Self::fetch_columns(&mut tx, table_id).await?;
        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(columns)
    }

    async fn insert_records(&self, query: &CompiledQuery) -> Result<u64, Error> {
        let mut tx = self.begin().await?;

        let result = Self::bind_params(sqlx::query(&query.sql), &query.params)
            .execute(&mut *tx)
            .await.map_err($repo::interpret_error)?;

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(result.rows_affected())
    }

    async fn select_records(
        &self,
        query: &CompiledQuery,
        width: usize,
    ) -> Result<Vec<Vec<Value>>, Error> {
        let rows = Self::bind_params(sqlx::query(&query.sql), &query.params)
            .fetch_all(&self.executor)
            .await.map_err($repo::interpret_error)?;

        rows.iter().map(|row| Self::row_values(row, width)).collect()
    }
}

};
}
