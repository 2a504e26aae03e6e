//! Tests for the core types

use super::*;

mod error_class_tests {
    use super::*;

    #[test]
    fn test_too_many_clients_is_connection_class() {
        let err = SlsError::Connection(
            "Failed to connect to PostgreSQL: sorry, too many clients already (code: 53300)".into(),
        );
        assert_eq!(err.class(), ErrorClass::Connection);
        assert!(err.class().is_retryable());
    }

    #[test]
    fn test_admin_termination_is_query_class() {
        let err = SlsError::Query(
            "terminating connection due to administrator command (code: 57P01)".into(),
        );
        assert_eq!(ErrorClass::of(&err), ErrorClass::Query);
    }

    #[test]
    fn test_closed_connection_is_query_class() {
        let err = SlsError::Query("Failed to prepare query: connection closed".into());
        assert_eq!(err.class(), ErrorClass::Query);
    }

    #[test]
    fn test_syntax_error_is_other() {
        let err = SlsError::Query("syntax error at or near \"SELEC\" (code: 42601)".into());
        assert_eq!(err.class(), ErrorClass::Other);
        assert!(!err.class().is_retryable());
    }

    #[test]
    fn test_structural_errors_are_never_retried() {
        assert_eq!(SlsError::NotConnected.class(), ErrorClass::Other);
        assert_eq!(SlsError::Cancelled.class(), ErrorClass::Other);
        // Even when the message would match, a validation failure is fatal
        assert_eq!(
            SlsError::Validation(TOO_MANY_CLIENTS.into()).class(),
            ErrorClass::Other
        );
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = SlsError::Validation("maxConnections should not be negative".into());
        assert_eq!(err.to_string(), "maxConnections should not be negative");
    }
}

mod value_tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(5i32), Value::Int32(5));
        assert_eq!(Value::from("alice"), Value::String("alice".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(7i64)), Value::Int64(7));
        assert_eq!(
            Value::from(vec![1i32, 2]),
            Value::Array(vec![Value::Int32(1), Value::Int32(2)])
        );
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int32(90).as_i64(), Some(90));
        assert_eq!(Value::String("12".into()).as_i64(), Some(12));
        assert!(Value::Null.is_null());
        assert_eq!(Value::Null.as_i64(), None);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bytes(vec![1, 2, 3]).to_string(), "<3 bytes>");
        assert_eq!(Value::Array(vec![Value::Null]).to_string(), "[1 items]");
    }
}

mod result_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_query_result_scalar() {
        let result = QueryResult::from_rows(vec!["count".into()], vec![vec![Value::Int64(90)]]);
        assert_eq!(result.scalar(), Some(&Value::Int64(90)));
        assert_eq!(
            result.rows[0].get_by_name("count"),
            Some(&Value::Int64(90))
        );
        assert!(QueryResult::default().scalar().is_none());
    }

    #[test]
    fn test_row_columns_are_shared() {
        let result = QueryResult::from_rows(
            vec!["pid".into()],
            vec![vec![Value::Int32(1)], vec![Value::Int32(2)]],
        );
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[1].columns(), &["pid".to_string()]);
    }
}
