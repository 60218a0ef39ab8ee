//! Binding of [`DbValue`]s to positional placeholders.

use crate::models::DbValue;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::{Encode, Postgres, Type};

pub(crate) type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// A NULL sent with parameter type 0, leaving the server to infer the column type.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Bind one value to the next placeholder of a PostgreSQL query.
pub(crate) fn bind_value<'q>(query: PgQuery<'q>, value: &'q DbValue) -> PgQuery<'q> {
    match value {
        DbValue::Null => query.bind(UntypedNull),
        DbValue::Bool(v) => query.bind(*v),
        DbValue::Int(v) => query.bind(*v),
        DbValue::Float(v) => query.bind(*v),
        DbValue::String(v) => query.bind(v.as_str()),
        DbValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Build an executable query with every value bound in order.
pub(crate) fn bind_all<'q>(text: &'q str, values: &'q [DbValue]) -> PgQuery<'q> {
    values
        .iter()
        .fold(sqlx::query(text), |query, value| bind_value(query, value))
}
