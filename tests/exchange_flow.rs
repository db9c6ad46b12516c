//! End-to-end send / receive / reveal flows.
//!
//! Alice and Bob share in-memory services unless a test says otherwise.

use std::sync::Arc;

use async_trait::async_trait;
use image::codecs::gif::GifEncoder;
use image::{Delay, Frame, Rgba, RgbaImage};
use tokio::sync::Semaphore;

use stegchat::config::ExchangeConfig;
use stegchat::crypto::KeyPair;
use stegchat::error::ErrorKind;
use stegchat::exchange::directory::{DirectoryEntry, DirectoryRegistry};
use stegchat::exchange::{
    BlobStore, CarrierFile, Collaborators, Direction, Draft, ExchangeError, FileKeyDirectory,
    FileKeyStore, FsBlobStore, Inbox, KeyDirectory, MediaType, MemoryBlobStore, MemoryHub,
    MemoryInbox, MemoryKeyDirectory, MemoryKeyStore, MessageExchange, MessageId, Notification,
    Notifier, Precondition, RevealState, TcpNotificationListener, TcpNotifier, Upload,
    UploadReceipt,
};
use stegchat::stego::{CarrierImage, FrameSelection, PixelLayout, VideoFrameCarrier};

/// 100x100 greyscale PNG: exactly 10 000 usable bits.
fn image_carrier() -> CarrierFile {
    let pixels = (0..10_000u32).map(|i| (i * 37 % 251) as u8).collect();
    let png = CarrierImage::new(100, 100, PixelLayout::Luma8, pixels)
        .unwrap()
        .to_png_bytes()
        .unwrap();
    CarrierFile::image("cover.png", png)
}

fn tiny_carrier() -> CarrierFile {
    let png = CarrierImage::new(8, 8, PixelLayout::Luma8, vec![128; 64])
        .unwrap()
        .to_png_bytes()
        .unwrap();
    CarrierFile::image("tiny.png", png)
}

/// Five one-second frames.
fn five_second_video() -> Vec<u8> {
    let frames: Vec<Frame> = (0..5u32)
        .map(|i| {
            let buffer = RgbaImage::from_fn(64, 48, |x, y| {
                Rgba([
                    ((x * 3 + i * 40) % 256) as u8,
                    ((y * 4 + i * 70) % 256) as u8,
                    ((x * y + i) % 256) as u8,
                    255,
                ])
            });
            Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(1000, 1))
        })
        .collect();

    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder.encode_frames(frames).unwrap();
    }
    bytes
}

struct World {
    directory: Arc<MemoryKeyDirectory>,
    store: Arc<MemoryBlobStore>,
    hub: MemoryHub,
    keys: Arc<MemoryKeyStore>,
}

impl World {
    fn new() -> Self {
        Self {
            directory: Arc::new(MemoryKeyDirectory::new()),
            store: Arc::new(MemoryBlobStore::new()),
            hub: MemoryHub::new(),
            keys: Arc::new(MemoryKeyStore::new()),
        }
    }

    fn services(&self) -> Collaborators {
        Collaborators {
            directory: self.directory.clone(),
            store: self.store.clone(),
            notifier: Arc::new(self.hub.clone()),
            keys: self.keys.clone(),
        }
    }

    /// Publishes the user's key and installs the private half locally.
    fn enroll(&self, user: &str) -> KeyPair {
        let pair = KeyPair::generate();
        self.directory.register(user, &pair.public_key_bytes());
        self.keys.insert(user, &pair.secret_key_bytes()[..]);
        pair
    }

    fn user(&self, user: &str, config: ExchangeConfig) -> (MessageExchange, MemoryInbox) {
        let inbox = self.hub.register_user(user);
        (MessageExchange::new(user, self.services(), config), inbox)
    }
}

#[tokio::test]
async fn test_hello_through_an_image() {
    let world = World::new();
    world.enroll("alice");
    world.enroll("bob");
    let (alice, _) = world.user("alice", ExchangeConfig::default());
    let (bob, mut bob_inbox) = world.user("bob", ExchangeConfig::default());

    let outcome = alice
        .send(Draft::new("bob", "hello", image_carrier()))
        .await
        .unwrap();
    assert_eq!(outcome.capacity_total_bits, 10_000);
    assert_eq!(outcome.message.media_type, MediaType::Image);
    assert!(outcome.message.stego_frame_ref.is_none());

    let received = receive_next(&bob, &mut bob_inbox).await;
    assert_eq!(bob.reveal_state(received).unwrap(), RevealState::Received);
    assert_eq!(bob.reveal(received).await.unwrap(), "hello");
    assert_eq!(bob.reveal_state(received).unwrap(), RevealState::Revealed);

    let history = bob.history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].entry.direction, Direction::Received);
    assert_eq!(history[0].plaintext.as_deref(), Some("hello"));

    // The uploaded carrier is a PNG of the same size as the cover.
    let stego = CarrierImage::from_bytes(&bob.download(&outcome.message.carrier_ref).await.unwrap())
        .unwrap();
    assert_eq!((stego.width(), stego.height()), (100, 100));
}

#[tokio::test]
async fn test_secret_through_a_video_frame() {
    let world = World::new();
    world.enroll("bob");
    let config = ExchangeConfig::default().with_frame_selection(FrameSelection::Offset {
        offset_ms: 2500,
    });
    let (alice, _) = world.user("alice", config);
    let (bob, mut bob_inbox) = world.user("bob", ExchangeConfig::default());

    let video = five_second_video();
    let outcome = alice
        .send(Draft::new(
            "bob",
            "secret",
            CarrierFile::video("clip.gif", video.clone()),
        ))
        .await
        .unwrap();

    let message = &outcome.message;
    assert_eq!(message.media_type, MediaType::Video);
    assert_eq!(message.frame_timestamp_ms(), Some(2000));
    let frame = message.frame.clone().unwrap();
    assert_eq!(frame.frame_index, 2);

    let received = receive_next(&bob, &mut bob_inbox).await;
    assert_eq!(bob.reveal(received).await.unwrap(), "secret");

    // The source video is stored untouched.
    let downloaded_video = bob.download(&message.carrier_ref).await.unwrap();
    assert_eq!(downloaded_video, video);

    // Relocating the frame in the downloaded copy gives the stego frame with
    // only the embedding plane differing.
    let stego_frame = CarrierImage::from_bytes(
        &bob.download(message.stego_frame_ref.as_deref().unwrap())
            .await
            .unwrap(),
    )
    .unwrap();
    let located = VideoFrameCarrier::default()
        .locate_frame(&downloaded_video, &frame)
        .unwrap();
    assert!(located.same_cover(&stego_frame));
    assert!(located
        .pixels()
        .iter()
        .zip(stego_frame.pixels())
        .all(|(&a, &b)| a & 0xFE == b & 0xFE));
}

#[tokio::test]
async fn test_failed_send_leaves_no_trace() {
    let world = World::new();
    world.enroll("bob");
    let (alice, _) = world.user("alice", ExchangeConfig::default());
    let (_bob, mut bob_inbox) = world.user("bob", ExchangeConfig::default());

    let err = alice
        .send(Draft::new("bob", "this will not fit", tiny_carrier()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    assert!(world.store.is_empty());
    assert!(alice.history().unwrap().is_empty());

    // The next notification Bob sees is for the next, successful send.
    let ok = alice
        .send(Draft::new("bob", "second try", image_carrier()))
        .await
        .unwrap();
    let notification = bob_inbox.next().await.unwrap().unwrap();
    assert_eq!(notification.message, ok.message);
    assert_eq!(alice.history().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unsupported_carrier_rejected() {
    let world = World::new();
    world.enroll("bob");
    let (alice, _) = world.user("alice", ExchangeConfig::default());

    let err = alice
        .send(Draft::new(
            "bob",
            "hi",
            CarrierFile::image("notes.txt", b"plain text".to_vec()),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedCarrier);
    assert!(world.store.is_empty());
}

#[tokio::test]
async fn test_missing_private_key_is_a_precondition() {
    let world = World::new();
    let bob_keys = world.enroll("bob");
    world.keys.remove("bob");
    let (alice, _) = world.user("alice", ExchangeConfig::default());
    let (bob, mut bob_inbox) = world.user("bob", ExchangeConfig::default());

    alice
        .send(Draft::new("bob", "hello", image_carrier()))
        .await
        .unwrap();
    let id = receive_next(&bob, &mut bob_inbox).await;

    let err = bob.reveal(id).await.unwrap_err();
    assert!(matches!(
        err,
        ExchangeError::PreconditionMissing(Precondition::PrivateKey(_))
    ));
    assert_eq!(err.kind(), ErrorKind::PreconditionMissing);
    assert_eq!(bob.reveal_state(id).unwrap(), RevealState::Received);

    // Retry after installing the key.
    world.keys.insert("bob", &bob_keys.secret_key_bytes()[..]);
    assert_eq!(bob.reveal(id).await.unwrap(), "hello");
}

#[tokio::test]
async fn test_wrong_key_fails_and_stays_retryable() {
    let world = World::new();
    let bob_keys = world.enroll("bob");
    world.keys.insert("bob", &KeyPair::generate().secret_key_bytes()[..]);
    let (alice, _) = world.user("alice", ExchangeConfig::default());
    let (bob, mut bob_inbox) = world.user("bob", ExchangeConfig::default());

    alice
        .send(Draft::new("bob", "hello", image_carrier()))
        .await
        .unwrap();
    let id = receive_next(&bob, &mut bob_inbox).await;

    let err = bob.reveal(id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecryptionFailed);
    assert_eq!(bob.reveal_state(id).unwrap(), RevealState::Received);
    assert_eq!(bob.history().unwrap()[0].plaintext, None);

    world.keys.insert("bob", &bob_keys.secret_key_bytes()[..]);
    assert_eq!(bob.reveal(id).await.unwrap(), "hello");
}

#[tokio::test]
async fn test_tampered_frame_metadata_is_frame_mismatch() {
    let world = World::new();
    world.enroll("bob");
    let (alice, _) = world.user("alice", ExchangeConfig::default());
    let (bob, _) = world.user("bob", ExchangeConfig::default());

    let outcome = alice
        .send(Draft::new(
            "bob",
            "secret",
            CarrierFile::video("clip.gif", five_second_video()),
        ))
        .await
        .unwrap();

    let mut message = outcome.message.clone();
    if let Some(frame) = message.frame.as_mut() {
        frame.cover_digest = "00".repeat(32);
    }
    let id = bob
        .receive(Notification {
            recipient_id: "bob".into(),
            message,
        })
        .unwrap();

    let err = bob.reveal(id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FrameMismatch);
}

/// Blob store whose downloads wait for a permit.
struct GatedStore {
    inner: MemoryBlobStore,
    gate: Semaphore,
}

#[async_trait]
impl BlobStore for GatedStore {
    async fn upload(&self, upload: Upload) -> Result<UploadReceipt, ExchangeError> {
        self.inner.upload(upload).await
    }

    async fn download(&self, reference: &str) -> Result<Vec<u8>, ExchangeError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ExchangeError::TransportFailure(e.to_string()))?;
        self.inner.download(reference).await
    }

    async fn delete(&self, reference: &str) -> Result<(), ExchangeError> {
        self.inner.delete(reference).await
    }
}

struct UnreachableNotifier;

#[async_trait]
impl Notifier for UnreachableNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), ExchangeError> {
        Err(ExchangeError::TransportFailure("Connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_undelivered_send_leaves_no_uploads() {
    let world = World::new();
    world.enroll("bob");
    let services = Collaborators {
        notifier: Arc::new(UnreachableNotifier),
        ..world.services()
    };
    let config = ExchangeConfig::default().with_frame_selection(FrameSelection::Offset {
        offset_ms: 2500,
    });
    let alice = MessageExchange::new("alice", services, config);

    let err = alice
        .send(Draft::new("bob", "hello", image_carrier()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
    assert!(world.store.is_empty());

    let err = alice
        .send(Draft::new(
            "bob",
            "secret",
            CarrierFile::video("clip.gif", five_second_video()),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
    assert!(world.store.is_empty());
    assert!(alice.history().unwrap().is_empty());
}

// Both sends upload the same untouched source video.
#[tokio::test]
async fn test_undelivered_send_keeps_shared_source_video() {
    let world = World::new();
    world.enroll("bob");
    let config = ExchangeConfig::default().with_frame_selection(FrameSelection::Offset {
        offset_ms: 2500,
    });
    let (alice, _) = world.user("alice", config.clone());
    let (bob, mut bob_inbox) = world.user("bob", ExchangeConfig::default());
    let offline = MessageExchange::new(
        "alice",
        Collaborators {
            notifier: Arc::new(UnreachableNotifier),
            ..world.services()
        },
        config,
    );
    let video = five_second_video();

    alice
        .send(Draft::new("bob", "secret", CarrierFile::video("clip.gif", video.clone())))
        .await
        .unwrap();
    let received = receive_next(&bob, &mut bob_inbox).await;
    assert!(offline
        .send(Draft::new("bob", "again", CarrierFile::video("clip.gif", video)))
        .await
        .is_err());

    assert_eq!(world.store.len(), 2);
    assert_eq!(bob.reveal(received).await.unwrap(), "secret");
}

#[tokio::test]
async fn test_one_reveal_at_a_time() {
    let world = World::new();
    world.enroll("bob");
    let store = Arc::new(GatedStore {
        inner: MemoryBlobStore::new(),
        gate: Semaphore::new(0),
    });
    let services = Collaborators {
        store: store.clone(),
        ..world.services()
    };
    let alice = MessageExchange::new("alice", services.clone(), ExchangeConfig::default());
    let bob = MessageExchange::new("bob", services, ExchangeConfig::default());
    let mut bob_inbox = world.hub.register_user("bob");

    alice
        .send(Draft::new("bob", "first", image_carrier()))
        .await
        .unwrap();
    alice
        .send(Draft::new("bob", "second", image_carrier()))
        .await
        .unwrap();
    let first = receive_next(&bob, &mut bob_inbox).await;
    let second = receive_next(&bob, &mut bob_inbox).await;

    let (slow, rejected) = tokio::join!(bob.reveal(first), async {
        let result = bob.reveal(second).await;
        store.gate.add_permits(8);
        result
    });

    assert_eq!(slow.unwrap(), "first");
    assert!(matches!(rejected, Err(ExchangeError::RevealInProgress)));

    // The marker is free again and the rejected message is still revealable.
    assert_eq!(bob.reveal_state(second).unwrap(), RevealState::Received);
    assert_eq!(bob.reveal(second).await.unwrap(), "second");
}

#[tokio::test]
async fn test_cancelled_reveal_releases_marker() {
    let world = World::new();
    world.enroll("bob");
    let store = Arc::new(GatedStore {
        inner: MemoryBlobStore::new(),
        gate: Semaphore::new(0),
    });
    let services = Collaborators {
        store: store.clone(),
        ..world.services()
    };
    let alice = MessageExchange::new("alice", services.clone(), ExchangeConfig::default());
    let bob = MessageExchange::new("bob", services, ExchangeConfig::default());
    let mut bob_inbox = world.hub.register_user("bob");

    alice
        .send(Draft::new("bob", "patience", image_carrier()))
        .await
        .unwrap();
    let id = receive_next(&bob, &mut bob_inbox).await;

    tokio::select! {
        biased;
        _ = bob.reveal(id) => panic!("download should be blocked"),
        _ = async {} => {}
    }

    assert_eq!(bob.reveal_state(id).unwrap(), RevealState::Received);
    store.gate.add_permits(1);
    assert_eq!(bob.reveal(id).await.unwrap(), "patience");
}

/// Directory that is always unreachable.
struct OfflineDirectory;

#[async_trait]
impl KeyDirectory for OfflineDirectory {
    async fn public_key(&self, _user_id: &str) -> Result<Option<Vec<u8>>, ExchangeError> {
        Err(ExchangeError::TransportFailure("connection refused".into()))
    }

    async fn users(&self) -> Result<Vec<String>, ExchangeError> {
        Err(ExchangeError::TransportFailure("connection refused".into()))
    }
}

#[tokio::test]
async fn test_directory_outage_is_transport_failure() {
    let world = World::new();
    let services = Collaborators {
        directory: Arc::new(OfflineDirectory),
        ..world.services()
    };
    let alice = MessageExchange::new("alice", services, ExchangeConfig::default());

    let err = alice
        .send(Draft::new("bob", "hello", image_carrier()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
    assert!(err.kind().is_retryable());
    assert!(world.store.is_empty());
}

#[tokio::test]
async fn test_file_backed_services() {
    let dir = tempfile::tempdir().unwrap();
    let keys_dir = dir.path().join("keys");
    std::fs::create_dir_all(&keys_dir).unwrap();

    let bob_keys = KeyPair::generate();
    bob_keys.save_to_files(&keys_dir.join("bob")).unwrap();

    let registry_path = dir.path().join("directory.toml");
    let mut registry = DirectoryRegistry::default();
    registry.upsert("bob", DirectoryEntry::new(keys_dir.join("bob.pub")));
    registry.save(&registry_path).unwrap();

    let hub = MemoryHub::new();
    let mut bob_inbox = hub.register_user("bob");
    let services = Collaborators {
        directory: Arc::new(FileKeyDirectory::new(&registry_path)),
        store: Arc::new(FsBlobStore::new(dir.path().join("uploads"))),
        notifier: Arc::new(hub.clone()),
        keys: Arc::new(FileKeyStore::new(&keys_dir)),
    };
    let alice = MessageExchange::new("alice", services.clone(), ExchangeConfig::default());
    let bob = MessageExchange::new("bob", services, ExchangeConfig::default());

    assert_eq!(alice.contacts().await.unwrap(), vec!["bob".to_string()]);
    alice
        .send(Draft::new("bob", "from disk", image_carrier()))
        .await
        .unwrap();

    let received = receive_next(&bob, &mut bob_inbox).await;
    assert_eq!(bob.reveal(received).await.unwrap(), "from disk");
}

#[tokio::test]
async fn test_notifications_over_tcp() {
    let world = World::new();
    world.enroll("bob");

    let listener = TcpNotificationListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (alice_notifier, _alice_inbox) = TcpNotifier::connect(addr).await.unwrap();
    let (_bob_notifier, mut bob_inbox) = listener.accept().await.unwrap();

    let alice_notifier = Arc::new(alice_notifier);
    let alice = MessageExchange::new(
        "alice",
        Collaborators {
            notifier: alice_notifier.clone(),
            ..world.services()
        },
        ExchangeConfig::default(),
    );
    let bob = MessageExchange::new("bob", world.services(), ExchangeConfig::default());

    alice
        .send(Draft::new("bob", "over the wire", image_carrier()))
        .await
        .unwrap();
    alice
        .send(Draft::new("bob", "and again", image_carrier()))
        .await
        .unwrap();
    alice_notifier.close().await.unwrap();

    assert_eq!(bob.pump(&mut bob_inbox).await.unwrap(), 2);
    let history = bob.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(bob.reveal(history[1].entry.id).await.unwrap(), "and again");
}

/// Takes exactly one notification from `inbox` into `exchange`'s history.
async fn receive_next(exchange: &MessageExchange, inbox: &mut MemoryInbox) -> MessageId {
    let notification = inbox.next().await.unwrap().unwrap();
    exchange.receive(notification).unwrap()
}
