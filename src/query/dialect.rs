/// SQL snippets that differ between the supported engines. Templates are
/// filled in by plain substitution of the placeholder words (`uuid_column`,
/// `json_column`, `json_key`, `timestamp_column`, `expr`), the same way for
/// every backend.
///
/// Substituted keys are always column ids or validated ASCII property keys,
/// so they never need escaping.
#[derive(Debug)]
pub struct SqlDialect {
    /// Render a binary UUID column as its canonical hyphenated string
    pub uuid_to_text: &'static str,
    /// Render a timestamp column as UTC RFC 3339 with millisecond precision
    pub timestamp_to_text: &'static str,
    /// Read a JSON key as a scalar: JSON null or a missing key is NULL,
    /// strings are unquoted, booleans are 1/0, everything else passes through
    pub json_scalar: &'static str,
    /// Read a JSON key as raw, untyped JSON
    pub json_raw: &'static str,
    /// Read a JSON key as text (used when sorting listings by property)
    pub json_text: &'static str,
    pub cast_character: &'static str,
    pub cast_signed_integer: &'static str,
    pub cast_float: &'static str,
}

impl SqlDialect {
    pub fn uuid_to_text(&self, column: &str) -> String {
        self.uuid_to_text.replace("uuid_column", column)
    }

    pub fn timestamp_to_text(&self, column: &str) -> String {
        self.timestamp_to_text.replace("timestamp_column", column)
    }

    pub fn json_scalar(&self, column: &str, key: &str) -> String {
        self.json_scalar
            .replace("json_column", column)
            .replace("json_key", key)
    }

    pub fn json_raw(&self, column: &str, key: &str) -> String {
        self.json_raw
            .replace("json_column", column)
            .replace("json_key", key)
    }

    pub fn json_text(&self, column: &str, key: &str) -> String {
        self.json_text
            .replace("json_column", column)
            .replace("json_key", key)
    }
}

pub const SQLITE: SqlDialect = SqlDialect {
    uuid_to_text: "lower(substr(hex(uuid_column), 1, 8) || '-' || substr(hex(uuid_column), 9, 4) \
        || '-' || substr(hex(uuid_column), 13, 4) || '-' || substr(hex(uuid_column), 17, 4) \
        || '-' || substr(hex(uuid_column), 21))",
    timestamp_to_text: "strftime('%Y-%m-%dT%H:%M:%f+00:00', timestamp_column)",
    json_scalar: "CASE json_type(json_column, '$.\"json_key\"') \
        WHEN 'null' THEN NULL \
        WHEN 'text' THEN json_extract(json_column, '$.\"json_key\"') \
        WHEN 'true' THEN 1 \
        WHEN 'false' THEN 0 \
        ELSE json_extract(json_column, '$.\"json_key\"') END",
    json_raw: "json_column -> '$.\"json_key\"'",
    json_text: "json_extract(json_column, '$.\"json_key\"')",
    cast_character: "CAST(expr AS TEXT)",
    cast_signed_integer: "CAST(expr AS INTEGER)",
    // SQLite has no exact decimal type; REAL is already an IEEE double
    cast_float: "CAST(expr AS REAL)",
};

pub const POSTGRES: SqlDialect = SqlDialect {
    uuid_to_text: "CAST(uuid_column AS TEXT)",
    timestamp_to_text: "to_char(timestamp_column AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"+00:00\"')",
    json_scalar: "CASE jsonb_typeof(json_column -> 'json_key') \
        WHEN 'null' THEN NULL \
        WHEN 'string' THEN json_column ->> 'json_key' \
        WHEN 'boolean' THEN CASE WHEN CAST(json_column -> 'json_key' AS BOOLEAN) THEN '1' ELSE '0' END \
        ELSE json_column ->> 'json_key' END",
    json_raw: "json_column -> 'json_key'",
    json_text: "json_column ->> 'json_key'",
    cast_character: "CAST(expr AS TEXT)",
    cast_signed_integer: "CAST(expr AS BIGINT)",
    cast_float: "CAST(CAST(expr AS NUMERIC) AS DOUBLE PRECISION)",
};
