use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use slspg_core::Value;

use super::mock::{MockConnector, MockServer, URL, admin_terminated};
use crate::{
    ConfigOverride, IDLE_PROCESSES_SQL, IdleProcessRecord, KILL_PROCESSES_SQL,
    MAX_CONNECTIONS_SQL, PROCESS_COUNT_SQL, ServerlessConnection,
};

async fn connected(server: &Arc<MockServer>, overrides: ConfigOverride) -> ServerlessConnection {
    let mut conn = ServerlessConnection::new(MockConnector::new(server), overrides).with_seed(5);
    conn.connect(URL).await.unwrap();
    conn
}

fn manual() -> ConfigOverride {
    ConfigOverride::default().manual_max_connections(true)
}

mod threshold_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_reaps_above_threshold() {
        let server = MockServer::new();
        server.process_count.store(90, Ordering::SeqCst);
        server.set_idle_pids(&[11, 12, 13]);
        let mut conn = connected(&server, manual()).await;

        let killed = conn.clean().await.unwrap();

        assert_eq!(killed, 3);
        let kills = server.calls_to(KILL_PROCESSES_SQL);
        assert_eq!(kills.len(), 1);
        assert_eq!(
            kills[0].params,
            vec![Value::Array(vec![
                Value::Int32(11),
                Value::Int32(12),
                Value::Int32(13)
            ])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_threshold_does_nothing() {
        let server = MockServer::new();
        server.process_count.store(70, Ordering::SeqCst);
        server.set_idle_pids(&[11]);
        let mut conn = connected(&server, manual()).await;

        assert_eq!(conn.clean().await.unwrap(), 0);
        assert!(server.calls_to(IDLE_PROCESSES_SQL).is_empty());
        assert!(server.calls_to(KILL_PROCESSES_SQL).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_at_threshold_does_nothing() {
        let server = MockServer::new();
        server.process_count.store(80, Ordering::SeqCst);
        server.set_idle_pids(&[11]);
        let mut conn = connected(&server, manual()).await;

        assert_eq!(conn.clean().await.unwrap(), 0);
        assert!(server.calls_to(IDLE_PROCESSES_SQL).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nan_threshold_never_reaps() {
        let server = MockServer::new();
        server.process_count.store(1, Ordering::SeqCst);
        server.set_idle_pids(&[7, 8]);
        let mut conn = connected(&server, manual()).await;
        conn.config.connection_utilization_threshold = f64::NAN;

        assert_eq!(conn.clean().await.unwrap(), 0);
        assert!(server.calls_to(KILL_PROCESSES_SQL).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_ceiling_is_used_as_given() {
        let server = MockServer::new();
        server.process_count.store(15, Ordering::SeqCst);
        server.set_idle_pids(&[4]);
        let mut conn = connected(&server, manual().max_connections(10)).await;

        assert_eq!(conn.clean().await.unwrap(), 1);
        assert!(server.calls_to(MAX_CONNECTIONS_SQL).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_idle_processes_skips_kill() {
        let server = MockServer::new();
        server.process_count.store(95, Ordering::SeqCst);
        let mut conn = connected(&server, manual()).await;

        assert_eq!(conn.clean().await.unwrap(), 0);
        assert_eq!(server.calls_to(IDLE_PROCESSES_SQL).len(), 1);
        assert!(server.calls_to(KILL_PROCESSES_SQL).is_empty());
    }
}

mod scan_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_process_count_is_scoped_to_identity() {
        let server = MockServer::new();
        server.process_count.store(12, Ordering::SeqCst);
        let mut conn = connected(&server, manual()).await;

        assert_eq!(conn.process_count().await.unwrap(), 12);

        let calls = server.calls_to(PROCESS_COUNT_SQL);
        assert_eq!(
            calls[0].params,
            vec![Value::String("mydb".into()), Value::String("alice".into())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_scan_parameters_without_cap() {
        let server = MockServer::new();
        server.set_idle_pids(&[3, 4]);
        let mut conn = connected(&server, manual().min_idle_seconds(2.0)).await;

        let records = conn.idle_processes().await.unwrap();

        assert_eq!(
            records,
            vec![IdleProcessRecord { pid: 3 }, IdleProcessRecord { pid: 4 }]
        );
        assert_eq!(
            server.calls_to(IDLE_PROCESSES_SQL)[0].params,
            vec![
                Value::String("alice".into()),
                Value::String("mydb".into()),
                Value::Float64(2.0),
                Value::Null,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_limits_killed_processes() {
        let server = MockServer::new();
        server.process_count.store(90, Ordering::SeqCst);
        server.set_idle_pids(&[1, 2]);
        let mut conn = connected(&server, manual().max_idle_connections_to_kill(1)).await;

        assert_eq!(conn.clean().await.unwrap(), 1);

        assert_eq!(
            server.calls_to(IDLE_PROCESSES_SQL)[0].params[3],
            Value::Int64(1)
        );
        assert_eq!(
            server.calls_to(KILL_PROCESSES_SQL)[0].params,
            vec![Value::Array(vec![Value::Int32(1)])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_nothing_is_a_no_op() {
        let server = MockServer::new();
        let mut conn = connected(&server, manual()).await;

        conn.kill_processes(&[]).await.unwrap();

        assert!(server.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_queries_survive_termination() {
        let server = MockServer::new();
        server.process_count.store(90, Ordering::SeqCst);
        server.set_idle_pids(&[21]);
        let mut conn = connected(&server, manual()).await;
        server.fail_ops([admin_terminated()]);

        assert_eq!(conn.clean().await.unwrap(), 1);
        assert_eq!(server.connects(), 2);
        assert_eq!(server.calls_to(PROCESS_COUNT_SQL).len(), 2);
    }
}

mod server_ceiling_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_server_ceiling_drives_threshold() {
        let server = MockServer::new();
        server.max_connections.store(50, Ordering::SeqCst);
        server.process_count.store(45, Ordering::SeqCst);
        server.set_idle_pids(&[7]);
        let mut conn = connected(&server, ConfigOverride::default()).await;

        assert_eq!(conn.clean().await.unwrap(), 1);
        assert_eq!(server.calls_to(MAX_CONNECTIONS_SQL).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_ceiling_is_cached_for_poll_interval() {
        let server = MockServer::new();
        server.max_connections.store(50, Ordering::SeqCst);
        let mut conn = connected(&server, ConfigOverride::default()).await;

        assert_eq!(conn.max_connections().await.unwrap(), 50);
        server.max_connections.store(80, Ordering::SeqCst);
        assert_eq!(conn.max_connections().await.unwrap(), 50);
        assert_eq!(server.calls_to(MAX_CONNECTIONS_SQL).len(), 1);

        tokio::time::advance(Duration::from_millis(60_001)).await;

        assert_eq!(conn.max_connections().await.unwrap(), 80);
        assert_eq!(server.calls_to(MAX_CONNECTIONS_SQL).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_poll_interval() {
        let server = MockServer::new();
        let mut conn = connected(
            &server,
            ConfigOverride::default().max_connections_poll_interval_ms(1000.0),
        )
        .await;

        conn.max_connections().await.unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        conn.max_connections().await.unwrap();
        assert_eq!(server.calls_to(MAX_CONNECTIONS_SQL).len(), 1);

        tokio::time::advance(Duration::from_millis(600)).await;
        conn.max_connections().await.unwrap();
        assert_eq!(server.calls_to(MAX_CONNECTIONS_SQL).len(), 2);
    }
}
