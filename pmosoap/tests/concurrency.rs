use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

use pmosoap::codec::{Codec, Decoder, Encoder, SoapCodec};
use pmosoap::endpoint::{RequestContext, StatefulRegistry};
use pmosoap::error::PipelineError;
use pmosoap::message::Message;
use pmosoap::pipeline::{Chain, Pipeline, PipelinePool, Stage, StageCloner};
use pmosoap::version::SoapVersion;
use pmosoap::xml::text_content;

const THREADS: usize = 8;
const ROUNDS: usize = 50;

fn request(thread: usize, round: usize) -> Message {
    Message::from_source(format!(
        r#"<c:Count xmlns:c="urn:count"><t>{}</t><r>{}</r></c:Count>"#,
        thread, round
    ))
    .unwrap()
    .with_version(SoapVersion::Soap12)
}

#[test]
fn test_codec_copies_in_parallel() {
    let prototype = SoapCodec::new(SoapVersion::Soap12);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let mut codec = prototype.copy();
            scope.spawn(move || {
                for r in 0..ROUNDS {
                    let mut message = request(t, r);
                    let mut wire = Vec::new();
                    let ct = codec.encode(&mut message, &mut wire).unwrap();
                    let mut back = codec.decode(&mut wire.as_slice(), &ct.content_type).unwrap();
                    let tree = back.read_payload_as_tree().unwrap();
                    assert_eq!(text_content(&tree), format!("{}{}", t, r));
                }
            });
        }
    });
}

/// Étape à état propre à chaque copie : compte les messages vus
struct Counter {
    seen: usize,
    copies: Arc<AtomicUsize>,
}

impl Stage for Counter {
    fn name(&self) -> &str {
        "counter"
    }

    fn process(&mut self, mut message: Message, _chain: &mut Chain<'_>) -> Result<Message, PipelineError> {
        self.seen += 1;
        message.set_property("seen", self.seen.to_string());
        Ok(message)
    }

    fn copy(&self, _cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Counter {
            seen: 0,
            copies: self.copies.clone(),
        }))
    }
}

#[test]
fn test_pipeline_copies_have_private_state() {
    let copies = Arc::new(AtomicUsize::new(0));
    let master = Pipeline::single(Box::new(Counter {
        seen: 0,
        copies: copies.clone(),
    }));

    thread::scope(|scope| {
        for _ in 0..THREADS {
            let mut pipeline = master.copy().unwrap();
            scope.spawn(move || {
                for r in 0..ROUNDS {
                    let response = pipeline.process(Message::empty()).unwrap();
                    assert_eq!(response.property("seen"), Some((r + 1).to_string().as_str()));
                }
            });
        }
    });
    assert_eq!(copies.load(Ordering::SeqCst), THREADS);
}

#[test]
fn test_pool_leases_are_exclusive() {
    let copies = Arc::new(AtomicUsize::new(0));
    let master = Pipeline::single(Box::new(Counter {
        seen: 0,
        copies: copies.clone(),
    }));
    let pool = PipelinePool::new(master, 2);
    let total = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..ROUNDS {
                    let mut lease = pool.lease().unwrap();
                    lease.process(Message::empty()).unwrap();
                    total.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(total.load(Ordering::SeqCst), THREADS * ROUNDS);
    assert!(pool.idle_count() <= 2);
    assert!(copies.load(Ordering::SeqCst) >= 1);

    pool.drain();
    assert!(matches!(pool.lease(), Err(PipelineError::Destroyed)));
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct Ticket(u32);

fn context() -> RequestContext {
    RequestContext::new("local://tickets")
}

#[test]
fn test_registry_dedup_across_threads() {
    let registry = StatefulRegistry::<Ticket>::new("Ticket");

    let ids: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    (0..ROUNDS)
                        .map(|_| registry.export(Ticket(7), &context()).object_id().unwrap())
                        .last()
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(registry.len(), 1);
    assert!(ids.iter().all(|id| *id == ids[0]));
    let first = registry.lookup(&ids[0]).unwrap();
    let second = registry.lookup(&ids[THREADS - 1]).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_registry_export_visible_to_other_thread() {
    let registry = StatefulRegistry::<Ticket>::new("Ticket");
    let (sender, receiver) = mpsc::channel::<(u32, String)>();

    thread::scope(|scope| {
        scope.spawn(|| {
            for n in 0..(ROUNDS as u32) {
                let id = registry.export(Ticket(n), &context()).object_id().unwrap();
                sender.send((n, id)).unwrap();
            }
            drop(sender);
        });
        scope.spawn(|| {
            for (n, id) in receiver {
                let found = registry.lookup(&id).expect("export not visible");
                assert_eq!(*found, Ticket(n));
            }
        });
    });
    assert_eq!(registry.len(), ROUNDS);
}

#[test]
fn test_registry_unexport_is_not_stale() {
    let registry = StatefulRegistry::<Ticket>::new("Ticket");
    let epr = registry.export(Ticket(1), &context());
    let gone = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                loop {
                    let unexported = gone.load(Ordering::Acquire);
                    let mut message = Message::empty();
                    epr.prepare(&mut message, SoapVersion::Soap12);
                    let resolved = registry.resolve(&mut message);
                    if unexported {
                        assert!(resolved.is_err(), "stale object after unexport");
                        break;
                    }
                    if let Ok(ticket) = resolved {
                        assert_eq!(*ticket, Ticket(1));
                    }
                }
            });
        }
        scope.spawn(|| {
            thread::yield_now();
            assert!(registry.unexport(Some(&Ticket(1))));
            gone.store(true, Ordering::Release);
        });
    });
    assert!(registry.is_empty());
    assert!(registry.lookup(&epr.object_id().unwrap()).is_none());
}
