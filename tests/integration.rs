use std::net::SocketAddr;

use redis::aio::MultiplexedConnection;
use redis::{ErrorKind, RedisError, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};

use tinydis::codec::DEFAULT_MAX_FRAME_SIZE;
use tinydis::server::serve;
use tinydis::store::Store;

/// Starts a server with a fresh store on an ephemeral port.
async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(serve(listener, Store::new(), DEFAULT_MAX_FRAME_SIZE));

    addr
}

async fn connect(addr: SocketAddr) -> Result<MultiplexedConnection, RedisError> {
    let client = redis::Client::open(format!("redis://{}/", addr))?;
    client.get_multiplexed_async_connection().await
}

/// Sends raw bytes and reads back exactly `expected.len()` bytes.
async fn roundtrip_raw(stream: &mut TcpStream, request: &[u8], expected: &[u8]) {
    stream.write_all(request).await.unwrap();

    let mut buf = vec![0; expected.len()];
    stream.read_exact(&mut buf).await.unwrap();

    assert_eq!(
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

async fn query_err(cmd: &redis::Cmd, con: &mut MultiplexedConnection) -> RedisError {
    let res: Result<Value, RedisError> = cmd.query_async(con).await;
    res.unwrap_err()
}

fn assert_response_error(err: RedisError, detail: &str) {
    assert_eq!(err.kind(), ErrorKind::ResponseError);
    assert_eq!(err.detail(), Some(detail));
}

#[tokio::test]
async fn test_ping() {
    let addr = start_server().await;
    let mut con = connect(addr).await.unwrap();

    let res: Value = redis::cmd("PING").query_async(&mut con).await.unwrap();
    assert_eq!(res, Value::Status("PONG".to_string()));

    let res: Value = redis::cmd("PING")
        .arg("hello")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!(res, Value::Data(b"hello".to_vec()));

    let err = query_err(redis::cmd("PING").arg("a").arg("b"), &mut con).await;
    assert_response_error(err, "wrong number of arguments for 'ping' command");
}

#[tokio::test]
async fn test_echo() {
    let addr = start_server().await;
    let mut con = connect(addr).await.unwrap();

    let res: String = redis::cmd("ECHO")
        .arg("Hello")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!(res, "Hello");

    let res: String = redis::cmd("ECHO").arg("").query_async(&mut con).await.unwrap();
    assert_eq!(res, "");

    let err = query_err(&redis::cmd("ECHO"), &mut con).await;
    assert_response_error(err, "wrong number of arguments for 'echo' command");
}

#[tokio::test]
async fn test_set_and_get() {
    let addr = start_server().await;
    let mut con = connect(addr).await.unwrap();

    let res: Vec<Value> = redis::pipe()
        .cmd("SET")
        .arg("set_get_key_1")
        .arg(1)
        .cmd("SET")
        .arg("set_get_key_2")
        .arg("Argentina")
        .cmd("SET")
        .arg("set_get_key_3")
        .arg(&b"Hello, World!"[..])
        .cmd("GET")
        .arg("set_get_key_1")
        .cmd("GET")
        .arg("set_get_key_2")
        .cmd("GET")
        .arg("set_get_key_3")
        .cmd("GET")
        .arg("set_get_nonexistentkey")
        .query_async(&mut con)
        .await
        .unwrap();

    assert_eq!(
        res,
        vec![
            Value::Okay,
            Value::Okay,
            Value::Okay,
            Value::Data(b"1".to_vec()),
            Value::Data(b"Argentina".to_vec()),
            Value::Data(b"Hello, World!".to_vec()),
            Value::Nil,
        ]
    );
}

#[tokio::test]
async fn test_keys_and_values_are_case_sensitive() {
    let addr = start_server().await;
    let mut con = connect(addr).await.unwrap();

    let _: () = redis::cmd("set")
        .arg("Key")
        .arg("Value")
        .query_async(&mut con)
        .await
        .unwrap();

    let res: Option<String> = redis::cmd("get").arg("key").query_async(&mut con).await.unwrap();
    assert_eq!(res, None);

    let res: Option<String> = redis::cmd("GeT").arg("Key").query_async(&mut con).await.unwrap();
    assert_eq!(res, Some("Value".to_string()));
}

#[tokio::test]
async fn test_set_with_expiry() {
    let addr = start_server().await;
    let mut con = connect(addr).await.unwrap();

    let _: () = redis::cmd("SET")
        .arg("expiring")
        .arg("World")
        .arg("PX")
        .arg(100)
        .query_async(&mut con)
        .await
        .unwrap();

    let res: Option<String> = redis::cmd("GET")
        .arg("expiring")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!(res, Some("World".to_string()));

    sleep(Duration::from_millis(150)).await;

    for _ in 0..2 {
        let res: Option<String> = redis::cmd("GET")
            .arg("expiring")
            .query_async(&mut con)
            .await
            .unwrap();
        assert_eq!(res, None);
    }
}

#[tokio::test]
async fn test_set_errors_do_not_mutate() {
    let addr = start_server().await;
    let mut con = connect(addr).await.unwrap();

    let err = query_err(redis::cmd("SET").arg("set_err_key"), &mut con).await;
    assert_response_error(err, "wrong number of arguments for 'set' command");

    let err = query_err(
        redis::cmd("SET")
            .arg("set_err_key")
            .arg("value")
            .arg("PX"),
        &mut con,
    )
    .await;
    assert_response_error(err, "wrong number of arguments for 'set' command");

    let err = query_err(
        redis::cmd("SET")
            .arg("set_err_key")
            .arg("value")
            .arg("PX")
            .arg("soon"),
        &mut con,
    )
    .await;
    assert_response_error(err, "value is not an integer or out of range");

    let err = query_err(
        redis::cmd("SET")
            .arg("set_err_key")
            .arg("value")
            .arg("PX")
            .arg(-1),
        &mut con,
    )
    .await;
    assert_response_error(err, "invalid expire time in 'set' command");

    let res: Option<String> = redis::cmd("GET")
        .arg("set_err_key")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!(res, None);
}

#[tokio::test]
async fn test_unknown_command_keeps_connection_open() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    roundtrip_raw(
        &mut stream,
        b"*1\r\n$8\r\nFLUSHALL\r\n",
        b"-ERR unknown command 'flushall'\r\n",
    )
    .await;

    roundtrip_raw(&mut stream, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
}

#[tokio::test]
async fn test_raw_replies() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    roundtrip_raw(&mut stream, b"*1\r\n$4\r\nping\r\n", b"+PONG\r\n").await;
    roundtrip_raw(
        &mut stream,
        b"*2\r\n$4\r\nECHO\r\n$0\r\n\r\n",
        b"$0\r\n\r\n",
    )
    .await;
    roundtrip_raw(
        &mut stream,
        b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n",
        b"+OK\r\n",
    )
    .await;
    roundtrip_raw(
        &mut stream,
        b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n",
        b"$3\r\nbar\r\n",
    )
    .await;
    roundtrip_raw(&mut stream, b"*2\r\n$3\r\nGET\r\n$3\r\nbaz\r\n", b"$-1\r\n").await;
}

#[tokio::test]
async fn test_malformed_frame_closes_only_its_connection() {
    let addr = start_server().await;
    let mut healthy = connect(addr).await.unwrap();
    let mut broken = TcpStream::connect(addr).await.unwrap();

    broken.write_all(b"GET foo\r\n").await.unwrap();

    let mut buf = [0; 64];
    let res = broken.read(&mut buf).await;
    assert!(matches!(res, Ok(0) | Err(_)), "expected closed connection, got {:?}", res);

    let res: String = redis::cmd("PING").query_async(&mut healthy).await.unwrap();
    assert_eq!(res, "PONG");

    let mut broken = TcpStream::connect(addr).await.unwrap();
    broken.write_all(b"*1\r\n$x\r\nPING\r\n").await.unwrap();

    let res = broken.read(&mut buf).await;
    assert!(matches!(res, Ok(0) | Err(_)), "expected closed connection, got {:?}", res);

    let res: String = redis::cmd("ECHO")
        .arg("still here")
        .query_async(&mut healthy)
        .await
        .unwrap();
    assert_eq!(res, "still here");
}

#[tokio::test]
async fn test_concurrent_sets() {
    let addr = start_server().await;

    let tasks: Vec<_> = ["1", "2"]
        .into_iter()
        .map(move |value| {
            tokio::spawn(async move {
                let mut con = connect(addr).await.unwrap();
                for _ in 0..100 {
                    let _: () = redis::cmd("SET")
                        .arg("concurrent_key")
                        .arg(value)
                        .query_async(&mut con)
                        .await
                        .unwrap();
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    let mut con = connect(addr).await.unwrap();
    let res: String = redis::cmd("GET")
        .arg("concurrent_key")
        .query_async(&mut con)
        .await
        .unwrap();
    assert!(res == "1" || res == "2", "unexpected value {:?}", res);
}
