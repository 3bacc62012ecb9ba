//! Same two-node topology as `dissemination_end_to_end.rs`, but driving the
//! rateless-coded variant end to end to confirm `RatelessCodec` slots into
//! the shared engine loop correctly (random linear coding over GF(256)
//! produces full-rank coverage in a finite number of rounds).

use std::thread;

use embassy_executor::{Executor, Spawner};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};

use deluge_net::{ChannelRadioDevice, DelugeEngine, EngineConfig, InFlightFrame, NodeAddr, RatelessCodec};

type RadioChannel = Channel<CriticalSectionRawMutex, InFlightFrame, 32>;
type StopChannel = Channel<CriticalSectionRawMutex, (), 1>;
type ResultChannel = Channel<CriticalSectionRawMutex, Result<(u32, Vec<u8>), &'static str>, 1>;

static OUT_A: RadioChannel = Channel::new();
static OUT_B: RadioChannel = Channel::new();
static STOP_A: StopChannel = Channel::new();
static STOP_B: StopChannel = Channel::new();
static DONE_B: Channel<CriticalSectionRawMutex, (u32, Vec<u8>), 1> = Channel::new();
static TEST_RESULT: ResultChannel = Channel::new();

const PAYLOAD: &[u8] = b"rateless coded dissemination across a few packets of payload";

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::with_defaults(40, 10);
    config.t_min_ms = 5;
    config.t_max_ms = 20;
    config.t_r_ms = 5;
    config.t_tx_ms = 5;
    config.frame_delay_ms = 1;
    config.w = 3;
    config.rx_max = 6;
    config
}

#[embassy_executor::task(pool_size = 2)]
async fn run_engine(mut engine: DelugeEngine<RatelessCodec, ChannelRadioDevice>) {
    engine.run().await;
}

#[embassy_executor::task]
async fn drive(spawner: Spawner) {
    let radio_a = ChannelRadioDevice::new(NodeAddr(1), &OUT_A, &OUT_B);
    let radio_b = ChannelRadioDevice::new(NodeAddr(2), &OUT_B, &OUT_A);

    let mut engine_a = DelugeEngine::new(NodeAddr(1), fast_config(), RatelessCodec, radio_a, STOP_A.receiver())
        .expect("valid config");
    engine_a.new_version(1, PAYLOAD, false);

    let done_tx = DONE_B.sender();
    let engine_b = DelugeEngine::new(NodeAddr(2), fast_config(), RatelessCodec, radio_b, STOP_B.receiver())
        .expect("valid config")
        .with_completion_handler(move |version, payload| {
            let _ = done_tx.try_send((version, payload));
        });

    spawner.must_spawn(run_engine(engine_a));
    spawner.must_spawn(run_engine(engine_b));

    let outcome = match select(DONE_B.receiver().receive(), Timer::after(Duration::from_secs(15))).await {
        Either::First(received) => Ok(received),
        Either::Second(_) => Err("node 2 never completed rateless dissemination within the deadline"),
    };

    STOP_A.sender().send(()).await;
    STOP_B.sender().send(()).await;

    TEST_RESULT.sender().send(outcome).await;
}

#[test]
fn rateless_coded_data_reaches_the_other_node() {
    let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
    thread::Builder::new()
        .name("deluge-rateless-test-executor".into())
        .spawn(move || {
            executor.run(|spawner| {
                spawner.must_spawn(drive(spawner));
            });
        })
        .expect("failed to spawn executor thread");

    let outcome = futures::executor::block_on(TEST_RESULT.receiver().receive());
    match outcome {
        Ok((version, payload)) => {
            assert_eq!(version, 1);
            assert_eq!(payload, PAYLOAD.to_vec());
        }
        Err(message) => panic!("{message}"),
    }
}
