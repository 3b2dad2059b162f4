// RedisBackend against a scripted RESP peer on an ephemeral port

use kvgate_store::{
    RedisBackend, RedisBackendConfig, StoreConfig, StoreError, StoredValue, TtlUnit, TypedStore,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Canned replies for the commands under test; everything else gets `+OK`
#[derive(Clone, Copy)]
struct Script {
    exec: &'static str,
    expire: &'static str,
}

const EXEC_OK: &str = "*1\r\n+OK\r\n";
const EXPIRE_OK: &str = ":1\r\n";

struct Peer {
    url: String,
    commands: Arc<Mutex<Vec<String>>>,
}

impl Peer {
    async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("redis://{}", listener.local_addr().unwrap());
        let commands = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&commands);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, script, Arc::clone(&log)));
            }
        });

        Self { url, commands }
    }

    /// Command names received, excluding connection upkeep
    fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .filter(|name| !matches!(name.as_str(), "PING" | "CLIENT"))
            .cloned()
            .collect()
    }

    async fn store(&self) -> TypedStore<RedisBackend> {
        let config = RedisBackendConfig {
            url: self.url.clone(),
            pool_size: 1,
            command_timeout: Some(Duration::from_secs(5)),
            max_watch_retries: 1,
        };
        let backend = RedisBackend::new(config).await.unwrap();
        TypedStore::new(
            Arc::new(backend),
            StoreConfig::default().with_ttl_unit(TtlUnit::Seconds),
        )
    }
}

async fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(String::from_utf8(buf).ok()?);
    }
    Some(args)
}

async fn serve(socket: TcpStream, script: Script, log: Arc<Mutex<Vec<String>>>) {
    let mut reader = BufReader::new(socket);
    let mut in_multi = false;

    while let Some(args) = read_command(&mut reader).await {
        let name = args[0].to_ascii_uppercase();
        log.lock().push(name.clone());

        let reply = match name.as_str() {
            "MULTI" => {
                in_multi = true;
                "+OK\r\n".to_string()
            }
            "EXEC" => {
                in_multi = false;
                script.exec.to_string()
            }
            _ if in_multi => "+QUEUED\r\n".to_string(),
            "PING" => match args.get(1) {
                Some(msg) => format!("${}\r\n{}\r\n", msg.len(), msg),
                None => "+PONG\r\n".to_string(),
            },
            "EXPIRE" => script.expire.to_string(),
            _ => "+OK\r\n".to_string(),
        };
        if reader.get_mut().write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn fields() -> Map<String, Value> {
    match json!({"a": 1}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn position(commands: &[String], name: &str) -> usize {
    commands
        .iter()
        .position(|c| c == name)
        .unwrap_or_else(|| panic!("{} not sent: {:?}", name, commands))
}

#[tokio::test]
async fn test_rejected_expiry_after_exec_is_partial_write() {
    let peer = Peer::start(Script {
        exec: EXEC_OK,
        expire: "-ERR invalid expire time in 'expire' command\r\n",
    })
    .await;
    let store = peer.store().await;

    let err = store.set_hash(&json!("h"), &fields(), 5).await.unwrap_err();

    assert!(
        matches!(&err, StoreError::PartialWrite { key, reason }
            if key == "h" && reason.contains("invalid expire time")),
        "{:?}",
        err
    );
    let commands = peer.commands();
    assert!(position(&commands, "EXEC") < position(&commands, "EXPIRE"));
}

#[tokio::test]
async fn test_rejected_list_expiry_is_partial_write() {
    let peer = Peer::start(Script {
        exec: "*1\r\n:2\r\n",
        expire: "-ERR invalid expire time in 'expire' command\r\n",
    })
    .await;
    let store = peer.store().await;

    let values = vec![StoredValue::Int(1), StoredValue::String("x".to_string())];
    let err = store.set_list(&json!("l"), &values, 5).await.unwrap_err();

    assert!(matches!(err, StoreError::PartialWrite { key, .. } if key == "l"));
}

#[tokio::test]
async fn test_rejected_write_inside_exec_is_backend_error() {
    let peer = Peer::start(Script {
        exec: "*1\r\n-ERR value rejected\r\n",
        expire: EXPIRE_OK,
    })
    .await;
    let store = peer.store().await;

    let err = store.set_hash(&json!("h"), &fields(), 5).await.unwrap_err();

    assert!(matches!(err, StoreError::Backend(_)), "{:?}", err);
    assert!(!peer.commands().contains(&"EXPIRE".to_string()));
}

#[tokio::test]
async fn test_write_then_expire_succeeds() {
    let peer = Peer::start(Script {
        exec: EXEC_OK,
        expire: EXPIRE_OK,
    })
    .await;
    let store = peer.store().await;

    store.set_hash(&json!("h"), &fields(), 5).await.unwrap();

    let commands = peer.commands();
    assert_eq!(commands.first().map(String::as_str), Some("WATCH"));
    assert!(position(&commands, "MULTI") < position(&commands, "EXEC"));
    assert_eq!(commands.last().map(String::as_str), Some("EXPIRE"));
}

#[tokio::test]
async fn test_aborted_exec_retries_then_conflicts() {
    let peer = Peer::start(Script {
        exec: "*-1\r\n",
        expire: EXPIRE_OK,
    })
    .await;
    let store = peer.store().await;

    let err = store.set_hash(&json!("h"), &fields(), 0).await.unwrap_err();

    assert!(matches!(err, StoreError::Conflict(_)), "{:?}", err);
    let commands = peer.commands();
    assert_eq!(commands.iter().filter(|c| *c == "WATCH").count(), 2);
    assert!(!commands.contains(&"EXPIRE".to_string()));
}
