//! 网执行场景测试
//! 测试汇合、分发、竞争仲裁、溯源与生命周期

use std::sync::Arc;
use std::time::Duration;

use cpn::net::{FabricError, MergeError, PlaceError};
use cpn::payload::{Counter, Value};
use cpn::process::{Annihilator, Collector, Generator, Inbox, Mediator, Outbox};
use cpn::{Context, Net, NetError, Token};

const N: i64 = 20;

fn ones(n: i64) -> Generator<Counter> {
    Generator::range(0, n, 1, |_| Counter(1))
}

fn deadline(ms: u64) -> Context {
    Context::background().with_timeout(Duration::from_millis(ms))
}

/// Waits until `done` holds, panicking after a second.
async fn eventually(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn failing(_ctx: Context, _input: Inbox<Counter>, _output: Outbox<Counter>) -> anyhow::Result<()> {
    anyhow::bail!("boom")
}

async fn doubler(ctx: Context, mut input: Inbox<Counter>, output: Outbox<Counter>) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            token = input.recv() => {
                let Some(token) = token else {
                    return Ok(());
                };
                output.send(Token::new(Counter(token.payload().0 * 2))).await?;
            }
            _ = ctx.cancelled() => return Ok(()),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn and_join_fires_once_per_pair_of_offers() {
    let sink = Collector::take(N as usize);
    let net: Net<Counter> = Net::new("join");
    net.add_place("a", ones(N)).unwrap();
    net.add_place("b", ones(N)).unwrap();
    net.add_place("c", sink.clone()).unwrap();
    net.add_transition("t0", ["a", "b"], ["c"]).unwrap();

    net.run(&deadline(5000)).await.unwrap();

    let stats = net.stats();
    assert_eq!(stats.get("c").unwrap().accepted, N as u64);
    assert_eq!(stats.get("a").unwrap().sent, N as u64);
    assert_eq!(stats.get("b").unwrap().sent, N as u64);
    assert!(sink.payloads().iter().all(|payload| *payload == Counter(2)));
}

#[tokio::test(flavor = "multi_thread")]
async fn and_split_copies_every_firing() {
    let (c, d) = (Collector::take(N as usize), Collector::take(N as usize));
    let net: Net<Counter> = Net::new("split");
    net.add_place("a", ones(N)).unwrap();
    net.add_place("c", c.clone()).unwrap();
    net.add_place("d", d.clone()).unwrap();
    net.add_transition("t0", ["a"], ["c", "d"]).unwrap();

    net.run(&deadline(5000)).await.unwrap();

    let stats = net.stats();
    assert_eq!(stats.get("c").unwrap().accepted, N as u64);
    assert_eq!(stats.get("d").unwrap().accepted, N as u64);
    assert_eq!(c.len(), N as usize);
    assert_eq!(d.len(), N as usize);
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_in_adds_up_both_transitions() {
    let sink = Collector::take((N + 5) as usize);
    let net: Net<Counter> = Net::new("fan-in");
    net.add_place("a", ones(N)).unwrap();
    net.add_place("b", ones(5)).unwrap();
    net.add_place("c", sink.clone()).unwrap();
    net.add_transition("t0", ["a"], ["c"]).unwrap();
    net.add_transition("t1", ["b"], ["c"]).unwrap();

    net.run(&deadline(5000)).await.unwrap();

    let stats = net.stats();
    assert_eq!(
        stats.get("c").unwrap().accepted,
        stats.get("a").unwrap().sent + stats.get("b").unwrap().sent
    );
    assert_eq!(stats.get("c").unwrap().accepted, (N + 5) as u64);
    let via_t0 = sink.tokens().iter().filter(|token| token.word() == "t0").count();
    assert_eq!(via_t0, N as usize);
}

#[tokio::test(flavor = "multi_thread")]
async fn competing_transitions_never_duplicate() {
    let (c, d) = (Collector::new(), Collector::new());
    let net: Net<Counter> = Net::new("compete");
    net.add_place("a", ones(N)).unwrap();
    net.add_place("b", ones(N)).unwrap();
    net.add_place("c", c.clone()).unwrap();
    net.add_place("d", d.clone()).unwrap();
    net.add_transition("t0", ["a", "b"], ["c", "d"]).unwrap();
    net.add_transition("t1", ["a", "b"], ["c", "d"]).unwrap();

    net.run(&deadline(500)).await.unwrap();

    let stats = net.stats();
    let (seen_c, seen_d) = (stats.get("c").unwrap().accepted, stats.get("d").unwrap().accepted);
    assert_eq!(seen_c, seen_d);
    assert_eq!(seen_c, N as u64);
    assert_eq!(stats.get("a").unwrap().sent, N as u64);
    assert_eq!(stats.get("b").unwrap().sent, N as u64);
    assert!(c.payloads().iter().all(|payload| *payload == Counter(2)));
    assert!(
        c.tokens()
            .iter()
            .all(|token| token.word() == "t0" || token.word() == "t1")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn competing_transitions_pair_a_single_offer() {
    for round in 0..50 {
        let (c, d) = (Collector::take(1), Collector::take(1));
        let net: Net<Counter> = Net::new("compete-once");
        net.add_place("a", ones(1)).unwrap();
        net.add_place("b", ones(1)).unwrap();
        net.add_place("c", c.clone()).unwrap();
        net.add_place("d", d.clone()).unwrap();
        net.add_transition("t0", ["a", "b"], ["c", "d"]).unwrap();
        net.add_transition("t1", ["a", "b"], ["c", "d"]).unwrap();

        net.run(&deadline(2000)).await.unwrap();

        assert_eq!((c.len(), d.len()), (1, 1), "run {round}");
        assert_eq!(c.payloads(), vec![Counter(2)], "run {round}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn shared_sender_feeds_every_outbound_transition() {
    const TOKENS: usize = 40;
    let (c, d) = (Collector::new(), Collector::new());
    let net: Arc<Net<Counter>> = Arc::new(Net::new("fan-out"));
    net.add_place("a", ones(TOKENS as i64)).unwrap();
    net.add_place("c", c.clone()).unwrap();
    net.add_place("d", d.clone()).unwrap();
    net.add_transition("t0", ["a"], ["c"]).unwrap();
    net.add_transition("t1", ["a"], ["d"]).unwrap();

    let run = {
        let net = Arc::clone(&net);
        tokio::spawn(async move { net.run(&deadline(5000)).await })
    };
    eventually(|| c.len() + d.len() == TOKENS).await;
    net.stop().unwrap();
    run.await.unwrap().unwrap();

    assert!(!c.is_empty() && !d.is_empty(), "c={} d={}", c.len(), d.len());
    assert_eq!(c.len() + d.len(), TOKENS);
    assert_eq!(net.stats().get("a").unwrap().sent, TOKENS as u64);
    assert!(c.tokens().iter().all(|token| token.word() == "t0"));
    assert!(d.tokens().iter().all(|token| token.word() == "t1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_inbound_transition_does_not_hold_back_the_other() {
    let sink = Collector::take((N + 1) as usize);
    let net: Arc<Net<Counter>> = Arc::new(Net::new("fan-in-idle"));
    net.add_place("a", ones(N)).unwrap();
    net.add_place("b", Mediator::new()).unwrap();
    net.add_place("c", sink.clone()).unwrap();
    net.add_transition("t0", ["a"], ["c"]).unwrap();
    net.add_transition("t1", ["b"], ["c"]).unwrap();

    let run = {
        let net = Arc::clone(&net);
        tokio::spawn(async move { net.run(&deadline(5000)).await })
    };
    eventually(|| sink.len() == N as usize).await;
    net.offer("b", Token::new(Counter(100))).await.unwrap();
    eventually(|| sink.len() == (N + 1) as usize).await;
    net.stop().unwrap();
    run.await.unwrap().unwrap();

    let tokens = sink.tokens();
    assert_eq!(tokens.iter().filter(|token| token.word() == "t0").count(), N as usize);
    let late: Vec<_> = tokens.iter().filter(|token| token.word() == "t1").collect();
    assert_eq!(late.len(), 1);
    assert_eq!(*late[0].payload(), Counter(100));
}

#[tokio::test(flavor = "multi_thread")]
async fn finished_receiver_does_not_stall_the_split() {
    let (c, d) = (Collector::take(1), Collector::take(N as usize));
    let net: Net<Counter> = Net::new("split-early-exit");
    net.add_place("a", ones(N)).unwrap();
    net.add_place("c", c.clone()).unwrap();
    net.add_place("d", d.clone()).unwrap();
    net.add_transition("t0", ["a"], ["c", "d"]).unwrap();

    net.run(&deadline(5000)).await.unwrap();

    assert_eq!(c.len(), 1);
    assert_eq!(d.len(), N as usize);
    assert_eq!(net.stats().get("a").unwrap().sent, N as u64);
}

#[tokio::test(flavor = "multi_thread")]
async fn every_crossing_leaves_a_checkpoint() {
    let sink = Collector::take(3);
    let net: Net<Counter> = Net::new("chain");
    net.add_place("p0", Generator::range(0, 3, 1, |idx| Counter(idx as u64))).unwrap();
    net.add_place("p1", Mediator::new()).unwrap();
    net.add_place("p2", Mediator::new()).unwrap();
    net.add_place("p3", sink.clone()).unwrap();
    net.add_transition("t0", ["p0"], ["p1"]).unwrap();
    net.add_transition("t1", ["p1"], ["p2"]).unwrap();
    net.add_transition("t2", ["p2"], ["p3"]).unwrap();

    let net = Arc::new(net);
    let run = {
        let net = Arc::clone(&net);
        tokio::spawn(async move { net.run(&deadline(5000)).await })
    };
    eventually(|| sink.len() == 3).await;
    net.stop().unwrap();
    run.await.unwrap().unwrap();

    let tokens = sink.tokens();
    assert_eq!(
        tokens.iter().map(|token| *token.payload()).collect::<Vec<_>>(),
        vec![Counter(0), Counter(1), Counter(2)]
    );
    for token in &tokens {
        assert_eq!(token.word(), "t0,t1,t2");
        let times: Vec<_> = token.trail().iter().map(|cp| cp.when).collect();
        assert!(times.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn pass_through_counts_every_stage() {
    let net: Arc<Net<Counter>> = Arc::new(Net::new("pass"));
    net.add_place("p0", ones(3)).unwrap();
    net.add_place("p1", Annihilator::new()).unwrap();
    net.add_transition("t0", ["p0"], ["p1"]).unwrap();

    let run = {
        let net = Arc::clone(&net);
        tokio::spawn(async move { net.run(&Context::background()).await })
    };
    eventually(|| net.stats().get("p1").is_some_and(|stats| stats.processing == 3)).await;
    net.stop().unwrap();
    run.await.unwrap().unwrap();

    let stats = net.stats();
    assert_eq!(stats.get("p0").unwrap().sent, 3);
    let p1 = stats.get("p1").unwrap();
    assert_eq!((p1.accepted, p1.processing, p1.sent), (3, 3, 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn join_merges_payloads() {
    let sink = Collector::take(1);
    let net: Net<Counter> = Net::new("merge");
    net.add_place("p0", Generator::values([Counter(1)])).unwrap();
    net.add_place("p1", Generator::values([Counter(2)])).unwrap();
    net.add_place("p2", sink.clone()).unwrap();
    net.add_transition("t0", ["p0", "p1"], ["p2"]).unwrap();

    net.run(&deadline(5000)).await.unwrap();

    assert_eq!(sink.payloads(), vec![Counter(3)]);
    assert_eq!(sink.tokens()[0].word(), "t0");
}

#[tokio::test(flavor = "multi_thread")]
async fn incompatible_join_fails_the_run() {
    let net: Net<Value> = Net::new("mismatch");
    net.add_place("p0", Generator::values([Value::Int(1)])).unwrap();
    net.add_place("p1", Generator::values([Value::Text("x".into())])).unwrap();
    net.add_place("p2", Collector::<Value>::new()).unwrap();
    net.add_transition("t0", ["p0", "p1"], ["p2"]).unwrap();

    let err = net.run(&deadline(5000)).await.unwrap_err();
    assert!(
        matches!(
            err,
            NetError::Place {
                source: PlaceError::Fabric(FabricError::Merge { .. }),
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert!(!net.state().is_active());
}

#[tokio::test(flavor = "multi_thread")]
async fn overflowing_join_is_a_merge_error() {
    let net: Net<Counter> = Net::new("overflow");
    net.add_place("p0", Generator::values([Counter(u64::MAX)])).unwrap();
    net.add_place("p1", Generator::values([Counter(1)])).unwrap();
    net.add_place("p2", Collector::<Counter>::new()).unwrap();
    net.add_transition("t0", ["p0", "p1"], ["p2"]).unwrap();

    let err = net.run(&deadline(5000)).await.unwrap_err();
    assert!(
        matches!(
            err,
            NetError::Place {
                source: PlaceError::Fabric(FabricError::Merge {
                    source: MergeError::Overflow { .. },
                    ..
                }),
                ..
            }
        ),
        "unexpected error: {err}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn process_error_becomes_run_error() {
    let net: Net<Counter> = Net::new("failing");
    net.add_place("p0", failing).unwrap();
    net.add_place("p1", Mediator::new()).unwrap();

    let err = net.run(&Context::background()).await.unwrap_err();
    match err {
        NetError::Place { place, source } => {
            assert_eq!(place, "p0");
            assert!(matches!(source, PlaceError::Process { .. }));
            assert!(source.to_string().contains("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn offers_reach_a_running_net() {
    let sink = Collector::take(2);
    let net: Arc<Net<Counter>> = Arc::new(Net::new("markup"));
    net.add_place("p0", Mediator::new()).unwrap();
    net.add_place("p1", sink.clone()).unwrap();
    net.add_transition("t0", ["p0"], ["p1"]).unwrap();

    let run = {
        let net = Arc::clone(&net);
        tokio::spawn(async move { net.run(&Context::background()).await })
    };
    net.offer("p0", Token::new(Counter(4))).await.unwrap();
    net.markup("p0", Token::new(Counter(5))).await.unwrap();
    eventually(|| sink.len() == 2).await;
    net.stop().unwrap();
    run.await.unwrap().unwrap();

    assert_eq!(sink.payloads(), vec![Counter(4), Counter(5)]);
    let p0 = net.stats().get("p0").unwrap();
    assert_eq!((p0.accepted, p0.sent), (0, 2));
}

#[tokio::test(flavor = "multi_thread")]
async fn plain_async_fn_is_a_process() {
    let sink = Collector::take(2);
    let net: Arc<Net<Counter>> = Arc::new(Net::new("double"));
    net.add_place("p0", doubler).unwrap();
    net.add_place("p1", sink.clone()).unwrap();
    net.add_transition("t0", ["p0"], ["p1"]).unwrap();

    net.offer("p0", Token::new(Counter(1))).await.unwrap();
    let run = {
        let net = Arc::clone(&net);
        tokio::spawn(async move { net.run(&Context::background()).await })
    };
    net.offer("p0", Token::new(Counter(2))).await.unwrap();
    eventually(|| sink.len() == 2).await;
    net.stop().unwrap();
    run.await.unwrap().unwrap();

    assert_eq!(sink.payloads(), vec![Counter(2), Counter(4)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn lifecycle_rejects_changes_while_active() {
    let net: Arc<Net<Counter>> = Arc::new(Net::new("lifecycle"));
    net.add_place("p0", Mediator::new()).unwrap();
    let parent = Context::background();
    let run = {
        let (net, parent) = (Arc::clone(&net), parent.clone());
        tokio::spawn(async move { net.run(&parent).await })
    };
    eventually(|| net.state().is_active()).await;

    assert!(matches!(net.add_place("p1", Mediator::new()), Err(NetError::Active)));
    assert!(matches!(net.add_transition("t0", ["p0"], ["p0"]), Err(NetError::Active)));

    // cancelling the caller's scope ends the run like stop does
    parent.cancel();
    run.await.unwrap().unwrap();
    assert!(!net.state().is_active());
    assert!(matches!(net.stop(), Err(NetError::Inactive)));

    // a net can run again once inactive
    net.add_place("p1", Annihilator::new()).unwrap();
    net.add_transition("t0", ["p0"], ["p1"]).unwrap();
    net.run(&deadline(50)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_run_does_not_clobber_a_newer_one() {
    let net: Arc<Net<Counter>> = Arc::new(Net::new("restart"));
    net.add_place("p0", Mediator::new()).unwrap();

    let first = {
        let net = Arc::clone(&net);
        tokio::spawn(async move { net.run(&Context::background()).await })
    };
    eventually(|| net.state().is_active()).await;
    net.stop().unwrap();

    let second = {
        let net = Arc::clone(&net);
        tokio::spawn(async move { net.run(&Context::background()).await })
    };
    first.await.unwrap().unwrap();
    eventually(|| net.state().is_active()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(net.state().is_active());

    net.stop().unwrap();
    second.await.unwrap().unwrap();
}
