use crate::application::repos::ContentError;

pub fn map_sqlx_error(err: sqlx::Error) -> ContentError {
    match err {
        sqlx::Error::PoolTimedOut => ContentError::Timeout,
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to user request") =>
        {
            ContentError::Timeout
        }
        other => ContentError::from_persistence(other),
    }
}
