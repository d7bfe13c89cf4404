use crate::error::EngineError;

pub fn map_sqlx_error(err: sqlx::Error) -> EngineError {
    match err {
        sqlx::Error::Database(db) if db.message().contains("duplicate key") => {
            EngineError::Duplicate {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            }
        }
        sqlx::Error::Database(db)
            if db.message().contains("violates")
                || db.message().contains("invalid input syntax") =>
        {
            EngineError::Validation {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to user request") =>
        {
            EngineError::Timeout
        }
        sqlx::Error::PoolTimedOut => EngineError::Timeout,
        other => EngineError::from_persistence(other),
    }
}
