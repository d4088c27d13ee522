//! Bridge-level tests: a server and a client bridge in one process,
//! exchanging updates over the rendezvous directory.

use std::collections::BTreeMap;

use tempfile::TempDir;

use envbridge_shared::bridge::Bridge;
use envbridge_shared::channel::{Channel, ChannelValue};
use envbridge_shared::dtype::Dtype;
use envbridge_shared::error::{BridgeError, RemoteError};

/// Listens, connects, accepts, and consumes the description.
async fn start_bridge(server: &mut Bridge, client: &mut Bridge) -> anyhow::Result<()> {
    server.listen()?;
    client.connect().await?;
    server.server_accept().await?;
    client.configure_client().await?;
    Ok(())
}

fn pair(dir: &TempDir) -> (Bridge, Bridge) {
    (Bridge::new(dir.path()), Bridge::new(dir.path()))
}

fn exists(dir: &TempDir, name: &str) -> bool {
    dir.path().join(name).exists()
}

#[tokio::test]
async fn setup_connection() -> anyhow::Result<()> {
    envbridge_tests::init_tracing();
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    start_bridge(&mut server, &mut client).await?;
    Ok(())
}

#[tokio::test]
async fn int_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("int", Channel::int())?;
    start_bridge(&mut server, &mut client).await?;

    assert_eq!(client.value("int")?, None);

    for v in [1i64, 2] {
        server.set_value("int", ChannelValue::Int(v))?;
        server.send().await?;
        client.recv().await?;
        assert_eq!(server.value("int")?, Some(ChannelValue::Int(v)));
        assert_eq!(client.value("int")?, Some(ChannelValue::Int(v)));
    }
    Ok(())
}

#[tokio::test]
async fn float_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("float", Channel::float())?;
    start_bridge(&mut server, &mut client).await?;

    assert_eq!(client.value("float")?, None);

    for v in [1.0f64, 0.5] {
        server.set_value("float", ChannelValue::Float(v))?;
        server.send().await?;
        client.recv().await?;
        assert_eq!(client.value("float")?, Some(ChannelValue::Float(v)));
    }
    Ok(())
}

#[tokio::test]
async fn bool_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("bool", Channel::bool())?;
    start_bridge(&mut server, &mut client).await?;

    assert_eq!(client.value("bool")?, None);

    for v in [true, false] {
        server.set_value("bool", ChannelValue::Bool(v))?;
        server.send().await?;
        client.recv().await?;
        assert_eq!(client.value("bool")?, Some(ChannelValue::Bool(v)));
    }
    Ok(())
}

#[tokio::test]
async fn int_fold_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("int_fold", Channel::int_fold(vec![2, 3])?)?;
    start_bridge(&mut server, &mut client).await?;

    assert_eq!(client.value("int_fold")?, None);

    for v in [vec![1i64, 2], vec![0, 1]] {
        server.set_value("int_fold", ChannelValue::IntVec(v.clone()))?;
        server.send().await?;
        client.recv().await?;
        assert_eq!(server.value("int_fold")?, Some(ChannelValue::IntVec(v.clone())));
        assert_eq!(client.value("int_fold")?, Some(ChannelValue::IntVec(v)));
    }
    Ok(())
}

#[tokio::test]
async fn np_round_trip_through_the_map() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("np", Channel::np(vec![2, 2], Dtype::parse("<i8")?)?)?;
    start_bridge(&mut server, &mut client).await?;

    for fill in [0i64, 1] {
        server.set_value("np", ChannelValue::IntVec(vec![fill; 4]))?;
        server.send().await?;
        client.recv().await?;
        let bytes = client.np_bytes("np")?;
        assert_eq!(Dtype::parse("<i8")?.decode_ints(bytes)?, vec![fill; 4]);
    }
    Ok(())
}

#[tokio::test]
async fn np_endianness_is_preserved() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    let ldtype = Dtype::parse("<u2")?;
    let bdtype = Dtype::parse(">u2")?;
    server.add_channel("npl", Channel::np(vec![2], ldtype)?)?;
    server.add_channel("npb", Channel::np(vec![2], bdtype)?)?;
    start_bridge(&mut server, &mut client).await?;

    assert_eq!(client.channel("npl").unwrap().dtype(), Some(ldtype));
    assert_eq!(client.channel("npb").unwrap().dtype(), Some(bdtype));

    for (name, dtype) in [("npl", ldtype), ("npb", bdtype)] {
        for values in [vec![1i64, 0x100], vec![0x100, 1]] {
            server.set_value(name, ChannelValue::IntVec(values.clone()))?;
            server.send().await?;
            client.recv().await?;
            assert_eq!(dtype.decode_ints(client.np_bytes(name)?)?, values);
        }
    }

    // Same logical values, opposite layouts in the backing files.
    server.set_value("npl", ChannelValue::IntVec(vec![1, 0x100]))?;
    server.set_value("npb", ChannelValue::IntVec(vec![1, 0x100]))?;
    server.send().await?;
    client.recv().await?;
    assert_eq!(client.np_bytes("npl")?, [1, 0, 0, 1]);
    assert_eq!(client.np_bytes("npb")?, [0, 1, 1, 0]);
    Ok(())
}

#[tokio::test]
async fn updates_carry_only_dirty_channels() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("int", Channel::int())?;
    server.add_channel("bool", Channel::bool())?;
    start_bridge(&mut server, &mut client).await?;

    server.set_value("bool", ChannelValue::Bool(true))?;
    server.send().await?;
    client.recv().await?;
    assert_eq!(client.value("int")?, None);
    assert_eq!(client.value("bool")?, Some(ChannelValue::Bool(true)));
    assert!(!server.channel("bool").unwrap().is_dirty());

    server.set_value("int", ChannelValue::Int(1))?;
    server.send().await?;
    client.recv().await?;
    assert_eq!(client.value("int")?, Some(ChannelValue::Int(1)));
    assert_eq!(client.value("bool")?, Some(ChannelValue::Bool(true)));

    server.set_value("bool", ChannelValue::Bool(false))?;
    server.set_value("int", ChannelValue::Int(2))?;
    server.send().await?;
    client.recv().await?;
    assert_eq!(client.value("int")?, Some(ChannelValue::Int(2)));
    assert_eq!(client.value("bool")?, Some(ChannelValue::Bool(false)));
    Ok(())
}

#[tokio::test]
async fn both_sides_closing_cleans_the_rendezvous() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("np", Channel::np(vec![2, 2], Dtype::uint8())?)?;
    start_bridge(&mut server, &mut client).await?;

    assert!(exists(&dir, "sock"));
    assert!(exists(&dir, "np"));

    client.close(None, None).await;
    server.close(None, None).await;

    assert!(!exists(&dir, "sock"));
    assert!(!exists(&dir, "np"));
    Ok(())
}

#[tokio::test]
async fn client_close_reaches_the_server() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("np", Channel::np(vec![2, 2], Dtype::uint8())?)?;
    start_bridge(&mut server, &mut client).await?;

    client.close(Some("disconnect"), None).await;
    match server.recv().await {
        Err(BridgeError::Closed { reason }) => assert_eq!(reason.as_deref(), Some("disconnect")),
        other => panic!("expected closed, got {other:?}"),
    }

    assert!(!exists(&dir, "sock"));
    assert!(!exists(&dir, "np"));
    Ok(())
}

#[tokio::test]
async fn failed_send_drains_the_buffered_close() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("np", Channel::np(vec![2, 2], Dtype::uint8())?)?;
    start_bridge(&mut server, &mut client).await?;

    client.close(Some("disconnect"), None).await;

    // The kernel may accept the first write after the peer is gone; the
    // receive that follows must still surface the buffered close.
    let outcome = async {
        server.send().await?;
        server.recv().await
    }
    .await;
    assert!(matches!(outcome, Err(BridgeError::Closed { .. })));

    assert!(!exists(&dir, "sock"));
    assert!(!exists(&dir, "np"));
    Ok(())
}

#[tokio::test]
async fn server_close_reaches_the_client() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("np", Channel::np(vec![2, 2], Dtype::uint8())?)?;
    start_bridge(&mut server, &mut client).await?;

    server.close(Some("disconnect"), None).await;
    match client.recv().await {
        Err(BridgeError::Closed { reason }) => assert_eq!(reason.as_deref(), Some("disconnect")),
        other => panic!("expected closed, got {other:?}"),
    }

    assert!(!exists(&dir, "sock"));
    assert!(!exists(&dir, "np"));
    Ok(())
}

#[tokio::test]
async fn server_cleans_up_without_a_client() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut server = Bridge::new(dir.path());
    server.listen()?;
    server.add_channel("np", Channel::np(vec![2, 2], Dtype::uint8())?)?;

    assert!(exists(&dir, "sock"));
    assert!(exists(&dir, "np"));

    server.close(Some("disconnect"), None).await;

    assert!(!exists(&dir, "sock"));
    assert!(!exists(&dir, "np"));
    Ok(())
}

#[tokio::test]
async fn close_carrying_an_error_id_raises_that_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    start_bridge(&mut server, &mut client).await?;

    server
        .close(None, Some(RemoteError::TimestepTimeout))
        .await;
    assert!(matches!(
        client.recv().await,
        Err(BridgeError::Remote {
            kind: RemoteError::TimestepTimeout,
            ..
        })
    ));

    // The terminal error replays on every later call.
    assert!(matches!(
        client.recv().await,
        Err(BridgeError::Remote {
            kind: RemoteError::TimestepTimeout,
            ..
        })
    ));
    assert!(matches!(
        client.send().await,
        Err(BridgeError::Remote {
            kind: RemoteError::TimestepTimeout,
            ..
        })
    ));
    Ok(())
}

#[tokio::test]
async fn exception_messages_do_not_close_the_session() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("int", Channel::int())?;
    start_bridge(&mut server, &mut client).await?;

    server.set_value("int", ChannelValue::Int(1))?;
    server.send().await?;
    client.recv().await?;

    server.exception(RemoteError::Remote, None).await?;
    assert!(matches!(
        client.recv().await,
        Err(BridgeError::Remote {
            kind: RemoteError::Remote,
            ..
        })
    ));

    // Still live afterwards.
    server.set_value("int", ChannelValue::Int(2))?;
    server.send().await?;
    client.recv().await?;
    assert_eq!(client.value("int")?, Some(ChannelValue::Int(2)));
    Ok(())
}

#[tokio::test]
async fn client_exceptions_reach_the_server() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    start_bridge(&mut server, &mut client).await?;

    server.send().await?;
    client.recv().await?;

    client.exception(RemoteError::Remote, Some("agent bug")).await?;
    client.send().await?;
    match server.recv().await {
        Err(BridgeError::Remote {
            kind: RemoteError::Remote,
            reason,
        }) => assert_eq!(reason.as_deref(), Some("agent bug")),
        other => panic!("expected remote error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn description_lists_every_channel() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("ac", Channel::int())?;
    server.add_channel("ob", Channel::np(vec![2], Dtype::uint8())?)?;
    start_bridge(&mut server, &mut client).await?;

    let names: Vec<&str> = client.channel_names().collect();
    assert_eq!(names, vec!["ac", "ob"]);
    assert_eq!(client.channel("ac").unwrap().kind_name(), "int");
    assert_eq!(client.channel("ob").unwrap().kind_name(), "np");
    Ok(())
}

#[tokio::test]
async fn duplicate_channels_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut server = Bridge::new(dir.path());
    server.add_channel("int", Channel::int())?;
    assert!(matches!(
        server.add_channel("int", Channel::int()),
        Err(BridgeError::Protocol(_))
    ));
    Ok(())
}

#[tokio::test]
async fn dropping_the_server_bridge_cleans_up() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut server, mut client) = pair(&dir);
    server.add_channel("np", Channel::np(vec![2, 2], Dtype::uint8())?)?;
    start_bridge(&mut server, &mut client).await?;

    drop(server);
    assert!(!exists(&dir, "sock"));
    assert!(!exists(&dir, "np"));

    // The drop-time close frame is delivered like an explicit close.
    assert!(matches!(
        client.recv().await,
        Err(BridgeError::Closed { .. })
    ));
    Ok(())
}

// Pins the handshake triple format independent of any socket.
#[test]
fn described_channels_serialize_as_triples() {
    let mut annotations = BTreeMap::new();
    annotations.insert("type".to_string(), "Discrete".to_string());
    annotations.insert("n".to_string(), "8".to_string());
    let mut channel = Channel::int();
    for (key, value) in &annotations {
        channel.annotate(key, value);
    }
    let text = serde_json::to_string(&channel.describe()).unwrap();
    assert_eq!(text, r#"["int",null,{"n":"8","type":"Discrete"}]"#);
}
