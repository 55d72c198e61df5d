//! End-to-end sessions over the in-memory network.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use tokio::time::timeout;

use tandem::core::{DocumentEngine, DocumentId, Label, PolicyKey};
use tandem::perms::{AuthorizationState, GrantLedger, Identity};
use tandem::store::{CapabilityGrant, CapabilityStoreExt, MemoryStore, SqliteStore};
use tandem::sync::{compute_digest, MemoryNetwork, PeerMessage, Transport};
use tandem::{ClientHandle, ClientSession, HostHandle, HostSession, Notice, SessionConfig};
use tandem_testkit::{identity, issue_grant, ManualApproval, NotesDoc, NotesEngine, ScriptedApproval};

const WAIT: Duration = Duration::from_secs(5);

type Host = HostHandle<NotesEngine>;
type Client = ClientHandle<NotesEngine>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start_host(
    network: &Arc<MemoryNetwork>,
    approval: Arc<ScriptedApproval>,
    config: SessionConfig,
) -> anyhow::Result<Host> {
    init_tracing();
    let host = HostSession::new(
        identity(0),
        NotesEngine,
        network.endpoint("host").await,
        approval,
        Arc::new(MemoryStore::new()),
        DocumentId::new("notes"),
    )
    .with_config(config)
    .start()
    .await?;
    Ok(host)
}

async fn start_client(
    network: &Arc<MemoryNetwork>,
    name: &str,
    who: Identity,
    store: Arc<MemoryStore>,
    config: SessionConfig,
) -> anyhow::Result<Client> {
    let client = ClientSession::new(who, "host", "L1", NotesEngine, network.endpoint(name).await, store)
        .with_config(config)
        .start()
        .await?;
    Ok(client)
}

async fn client_notice(client: &mut Client, wanted: impl Fn(&Notice) -> bool) -> anyhow::Result<Notice> {
    timeout(WAIT, async {
        while let Some(notice) = client.next_notice().await {
            if wanted(&notice) {
                return Ok(notice);
            }
        }
        bail!("client session stopped")
    })
    .await
    .context("timed out waiting for client notice")?
}

async fn host_notice(host: &mut Host, wanted: impl Fn(&Notice) -> bool) -> anyhow::Result<Notice> {
    timeout(WAIT, async {
        while let Some(notice) = host.next_notice().await {
            if wanted(&notice) {
                return Ok(notice);
            }
        }
        bail!("host session stopped")
    })
    .await
    .context("timed out waiting for host notice")?
}

async fn authorized(client: &mut Client) -> anyhow::Result<()> {
    client_notice(client, |n| matches!(n, Notice::Authorized { .. })).await?;
    Ok(())
}

async fn edit(client: &Client, actor: &str, key: &str, value: &str) -> anyhow::Result<()> {
    let mut doc = client.document().await?;
    doc.set(actor, key, value);
    client.submit(doc).await?;
    Ok(())
}

async fn wait_for_key(
    mut view: tokio::sync::watch::Receiver<std::collections::BTreeMap<String, String>>,
    key: &str,
    value: &str,
) -> anyhow::Result<()> {
    timeout(WAIT, view.wait_for(|content| content.get(key).map(String::as_str) == Some(value)))
        .await
        .context("timed out waiting for view")??;
    Ok(())
}

#[tokio::test]
async fn test_grant_then_authorize() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let approval = Arc::new(ScriptedApproval::approve_all());
    let host = start_host(&network, approval.clone(), SessionConfig::default()).await?;

    let store = Arc::new(MemoryStore::new());
    let mut client = start_client(&network, "c1", identity(1), store.clone(), SessionConfig::default()).await?;

    authorized(&mut client).await?;

    assert_eq!(client.state().await?, AuthorizationState::Authorized);
    assert_eq!(approval.request_count(), 1);
    assert!(store.load_grant(&Label::new("L1")).await?.is_some());
    assert_eq!(host.authorized_peers().await?.len(), 1);

    client.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_rejection_without_retry() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let approval = Arc::new(ScriptedApproval::deny_all());
    let host = start_host(&network, approval.clone(), SessionConfig::default()).await?;

    let store = Arc::new(MemoryStore::new());
    let mut client = start_client(&network, "c1", identity(1), store.clone(), SessionConfig::default()).await?;

    client_notice(&mut client, |n| matches!(n, Notice::GrantRejected { .. })).await?;
    client_notice(&mut client, |n| matches!(n, Notice::ConnectionClosed { .. })).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(approval.request_count(), 1);
    assert_eq!(client.state().await?, AuthorizationState::Closed);
    assert!(store.load_grant(&Label::new("L1")).await?.is_none());
    assert!(host.authorized_peers().await?.is_empty());

    client.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_stored_grant_is_reused() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let approval = Arc::new(ScriptedApproval::approve_all());
    let host = start_host(&network, approval.clone(), SessionConfig::default()).await?;
    let store = Arc::new(MemoryStore::new());

    let mut first = start_client(&network, "c1", identity(1), store.clone(), SessionConfig::default()).await?;
    authorized(&mut first).await?;
    first.shutdown().await?;

    let mut second = start_client(&network, "c1-again", identity(1), store.clone(), SessionConfig::default()).await?;
    authorized(&mut second).await?;

    assert_eq!(approval.request_count(), 1);

    second.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_edits_converge_across_participants() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let host = start_host(&network, Arc::new(ScriptedApproval::approve_all()), SessionConfig::default()).await?;

    let mut a = start_client(&network, "a", identity(1), Arc::new(MemoryStore::new()), SessionConfig::default()).await?;
    let mut b = start_client(&network, "b", identity(2), Arc::new(MemoryStore::new()), SessionConfig::default()).await?;
    authorized(&mut a).await?;
    authorized(&mut b).await?;

    edit(&a, "a", "title", "Minutes").await?;
    wait_for_key(b.view(), "title", "Minutes").await?;

    edit(&b, "b", "body", "Ship it").await?;
    wait_for_key(a.view(), "body", "Ship it").await?;

    let mut doc = host.document().await?;
    doc.set("host", "footer", "end");
    host.submit(doc).await?;
    wait_for_key(a.view(), "footer", "end").await?;
    wait_for_key(b.view(), "footer", "end").await?;

    assert_eq!(a.content(), host.content());
    assert_eq!(b.content(), host.content());

    a.shutdown().await?;
    b.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_late_joiner_receives_document() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let host = start_host(&network, Arc::new(ScriptedApproval::approve_all()), SessionConfig::default()).await?;

    let mut doc = host.document().await?;
    doc.set("host", "title", "Before you joined");
    host.submit(doc).await?;

    let mut late = start_client(&network, "late", identity(3), Arc::new(MemoryStore::new()), SessionConfig::default()).await?;
    authorized(&mut late).await?;
    wait_for_key(late.view(), "title", "Before you joined").await?;

    late.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_unauthorized_traffic_is_ignored() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let host = start_host(&network, Arc::new(ScriptedApproval::approve_all()), SessionConfig::default()).await?;

    let intruder = network.endpoint("intruder").await;
    intruder.connect(&"host".into()).await?;

    let mut forged = NotesDoc::default();
    forged.set("intruder", "title", "pwned");
    let engine = NotesEngine;
    let change = PeerMessage::Change {
        diff: engine.diff(&engine.init(), &forged),
        digest: compute_digest(&engine.materialize(&forged))?,
    };
    intruder.send(&"host".into(), change.encode()?).await?;
    intruder.send(&"host".into(), Bytes::from_static(b"\x00not cbor")).await?;

    // A legitimate client still gets through, and sees nothing forged.
    let mut client = start_client(&network, "c1", identity(1), Arc::new(MemoryStore::new()), SessionConfig::default()).await?;
    authorized(&mut client).await?;

    assert!(host.content().is_empty());
    assert!(client.content().is_empty());

    client.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_stale_grant_is_replaced() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let approval = Arc::new(ScriptedApproval::approve_all());
    let host = start_host(&network, approval.clone(), SessionConfig::default()).await?;

    // A grant the host never issued, e.g. from a ledger that was lost.
    let store = Arc::new(MemoryStore::new());
    let stale = CapabilityGrant {
        label: Label::new("L1"),
        policy_key: PolicyKey::generate(),
        host_verifying_key: identity(0).verifying_key(),
    };
    store.save_grant(&stale).await?;

    let config = SessionConfig::default().handshake_timeout(Duration::from_millis(100));
    let mut client = start_client(&network, "c1", identity(1), store.clone(), config).await?;
    authorized(&mut client).await?;

    let fresh = store
        .load_grant(&Label::new("L1"))
        .await?
        .context("grant should be stored")?;
    assert_ne!(fresh.policy_key, stale.policy_key);
    assert_eq!(approval.request_count(), 1);

    client.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_revoke_disconnects_holders() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let mut host = start_host(&network, Arc::new(ScriptedApproval::approve_all()), SessionConfig::default()).await?;

    let store = Arc::new(MemoryStore::new());
    let mut client = start_client(&network, "c1", identity(1), store.clone(), SessionConfig::default()).await?;
    authorized(&mut client).await?;

    assert_eq!(host.revoke("L1").await?, 1);

    client_notice(&mut client, |n| matches!(n, Notice::GrantRejected { .. })).await?;
    host_notice(&mut host, |n| matches!(n, Notice::ConnectionClosed { .. })).await?;
    client_notice(&mut client, |n| matches!(n, Notice::ConnectionClosed { .. })).await?;

    assert!(store.load_grant(&Label::new("L1")).await?.is_none());
    assert!(host.authorized_peers().await?.is_empty());

    client.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_client_view_resets_when_host_leaves() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let host = start_host(&network, Arc::new(ScriptedApproval::approve_all()), SessionConfig::default()).await?;

    let mut client = start_client(&network, "c1", identity(1), Arc::new(MemoryStore::new()), SessionConfig::default()).await?;
    authorized(&mut client).await?;
    edit(&client, "c1", "title", "draft").await?;

    let mut view = client.view();
    host.shutdown().await?;

    timeout(WAIT, view.wait_for(|content| content.is_empty()))
        .await
        .context("view never reset")??;
    client_notice(&mut client, |n| matches!(n, Notice::ConnectionClosed { .. })).await?;

    client.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_host_archive_survives_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("host.db");
    let config = SessionConfig::default().save_interval(Duration::from_millis(20));

    {
        let network = MemoryNetwork::new();
        let archive = Arc::new(SqliteStore::open(&path)?);
        let host = HostSession::new(
            identity(0),
            NotesEngine,
            network.endpoint("host").await,
            ScriptedApproval::approve_all(),
            archive,
            DocumentId::new("notes"),
        )
        .with_config(config.clone())
        .start()
        .await?;

        let mut client = start_client(&network, "c1", identity(1), Arc::new(MemoryStore::new()), config.clone()).await?;
        authorized(&mut client).await?;
        edit(&client, "c1", "title", "kept").await?;
        wait_for_key(host.view(), "title", "kept").await?;

        client.shutdown().await?;
        host.shutdown().await?;
    }

    let network = MemoryNetwork::new();
    let restarted = HostSession::new(
        identity(0),
        NotesEngine,
        network.endpoint("host").await,
        ScriptedApproval::approve_all(),
        Arc::new(SqliteStore::open(&path)?),
        DocumentId::new("notes"),
    )
    .start()
    .await?;

    assert_eq!(
        restarted.content().get("title").map(String::as_str),
        Some("kept")
    );
    restarted.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_periodic_rechallenge_keeps_honest_client() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let config = SessionConfig::default().challenge_interval(Duration::from_millis(30));
    let host = start_host(&network, Arc::new(ScriptedApproval::approve_all()), config).await?;

    let mut client = start_client(&network, "c1", identity(1), Arc::new(MemoryStore::new()), SessionConfig::default()).await?;
    authorized(&mut client).await?;

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(client.state().await?, AuthorizationState::Authorized);
    assert_eq!(host.authorized_peers().await?.len(), 1);

    client.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_pending_approval_only_holds_its_own_connection() -> anyhow::Result<()> {
    init_tracing();
    let network = MemoryNetwork::new();
    let (approval, mut requests) = ManualApproval::new();

    let mut ledger = GrantLedger::new();
    let stored = issue_grant(&mut ledger, &identity(0), &identity(2), "L1");

    let host = HostSession::new(
        identity(0),
        NotesEngine,
        network.endpoint("host").await,
        approval,
        Arc::new(MemoryStore::new()),
        DocumentId::new("notes"),
    )
    .with_ledger(ledger)
    .start()
    .await?;

    let mut newcomer = start_client(&network, "c1", identity(1), Arc::new(MemoryStore::new()), SessionConfig::default()).await?;
    let pending = timeout(WAIT, requests.recv())
        .await
        .context("timed out waiting for approval request")?
        .context("approval port closed")?;
    assert_eq!(pending.requester.verifying_key, identity(1).verifying_key());

    let store = Arc::new(MemoryStore::new());
    store.save_grant(&stored).await?;
    let mut holder = start_client(&network, "c2", identity(2), store, SessionConfig::default()).await?;
    authorized(&mut holder).await?;

    edit(&holder, "c2", "status", "moving").await?;
    wait_for_key(host.view(), "status", "moving").await?;

    let mut doc = host.document().await?;
    doc.set("host", "agenda", "review");
    host.submit(doc).await?;
    wait_for_key(holder.view(), "agenda", "review").await?;

    assert_ne!(newcomer.state().await?, AuthorizationState::Authorized);
    assert_eq!(host.authorized_peers().await?.len(), 1);

    pending.approve();
    authorized(&mut newcomer).await?;
    wait_for_key(newcomer.view(), "status", "moving").await?;
    assert_eq!(host.authorized_peers().await?.len(), 2);

    newcomer.shutdown().await?;
    holder.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}
