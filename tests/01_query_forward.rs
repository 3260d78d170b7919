mod support;

use mysql_async::{OptsBuilder, prelude::Queryable};
use mysql_auth_proxy::BackendConfig;

// Needs a real server: MYSQL_AUTH_PROXY_TEST_BACKEND=user:pass@127.0.0.1:3306/db
// Run with `cargo test -- --ignored`.
const NEEDS_BACKEND: &str = "needs a real MySQL server in MYSQL_AUTH_PROXY_TEST_BACKEND";

async fn proxy_to_real_backend() -> support::RunningProxy {
    let dsn = support::real_backend_dsn().expect(NEEDS_BACKEND);
    let config = BackendConfig::from_dsn(&dsn).expect("valid MYSQL_AUTH_PROXY_TEST_BACKEND");
    support::start_proxy(config).await
}

fn client_opts(port: u16, user: &str, password: &str) -> OptsBuilder {
    OptsBuilder::default()
        .ip_or_hostname("127.0.0.1")
        .tcp_port(port)
        .user(Some(user))
        .pass(Some(password))
        .prefer_socket(false)
}

#[tokio::test]
#[ignore = "needs a real MySQL server in MYSQL_AUTH_PROXY_TEST_BACKEND"]
async fn select_one_with_bogus_credentials() {
    let proxy = proxy_to_real_backend().await;

    let mut conn = mysql_async::Conn::new(client_opts(proxy.port, "foo", "bar"))
        .await
        .expect("forged login should succeed");

    let value: Option<i64> = conn.query_first("SELECT 1").await.expect("query through proxy");
    assert_eq!(value, Some(1));

    conn.disconnect().await.expect("clean disconnect");
}

#[tokio::test]
#[ignore = "needs a real MySQL server in MYSQL_AUTH_PROXY_TEST_BACKEND"]
async fn many_round_trips_on_one_session() {
    let proxy = proxy_to_real_backend().await;

    let mut conn = mysql_async::Conn::new(client_opts(proxy.port, "nobody", ""))
        .await
        .expect("forged login should succeed");

    for i in 0..50i64 {
        let value: Option<i64> = conn
            .query_first(format!("SELECT {i} + 1"))
            .await
            .expect("query through proxy");
        assert_eq!(value, Some(i + 1));
    }

    // Session state lives on the backend and survives between statements.
    conn.query_drop("SET @proxy_marker = 42").await.unwrap();
    let marker: Option<i64> = conn.query_first("SELECT @proxy_marker").await.unwrap();
    assert_eq!(marker, Some(42));

    conn.disconnect().await.unwrap();
}
