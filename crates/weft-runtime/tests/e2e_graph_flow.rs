//! End-to-end message flow through a running graph: frame round trips,
//! node properties, and multi-result commands.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft_runtime::{
    AddonRegistry, AudioFrame, Cmd, CmdResult, Extension, ExtensionEnv, Message, StatusCode,
};

// ---------------------------------------------------------------------
// Audio frame round trip: client → A (cmd), A → B (audio frame),
// B → A (ack cmd), A → client (result).
// ---------------------------------------------------------------------

struct FrameSource {
    pending: Option<Cmd>,
}

impl Extension for FrameSource {
    fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Cmd) {
        match cmd.name.as_str() {
            "hello_world" => {
                self.pending = Some(cmd);
                let mut frame = AudioFrame::new("audio_frame");
                frame.sample_rate = 16_000;
                frame.channels = 1;
                frame.pcm = vec![0u8; 320];
                env.send_audio_frame(frame).expect("frame route declared");
            }
            "audio_frame_ack" => {
                let original = self.pending.take().expect("hello_world seen first");
                let mut result = CmdResult::from_cmd(StatusCode::Ok, &original);
                result
                    .set_property("detail", "hello world, too")
                    .expect("set detail");
                env.return_result(result).expect("client reachable");
            }
            other => panic!("unexpected command: {other}"),
        }
    }
}

struct FrameSink;

impl Extension for FrameSink {
    fn on_audio_frame(&mut self, env: &mut ExtensionEnv, frame: AudioFrame) {
        assert_eq!(frame.sample_rate, 16_000);
        env.send_cmd(Cmd::new("audio_frame_ack")).expect("ack route declared");
    }
}

#[test]
fn audio_frame_round_trip() {
    let uri = "test://audio-frame-basic";
    let mut registry = AddonRegistry::new();
    registry.register("frame_source", || FrameSource { pending: None });
    registry.register("frame_sink", || FrameSink);

    let (client, app_join) = common::spawn_app(registry, uri);
    let graph_id = common::start_graph(
        &client,
        &format!(
            r#"{{
                "nodes": [
                    {{ "type": "extension", "name": "source", "addon": "frame_source",
                       "extension_group": "frame_group", "app": "{uri}" }},
                    {{ "type": "extension", "name": "sink", "addon": "frame_sink",
                       "extension_group": "frame_group", "app": "{uri}" }}
                ],
                "connections": [
                    {{ "extension": "source",
                       "audio_frame": [{{ "name": "audio_frame",
                                          "dest": [{{ "extension": "sink" }}] }}] }},
                    {{ "extension": "sink",
                       "cmd": [{{ "name": "audio_frame_ack",
                                  "dest": [{{ "extension": "source" }}] }}] }}
                ]
            }}"#
        ),
    );

    let result = client
        .send_cmd_and_recv_result(common::cmd_to("hello_world", uri, &graph_id, "source"))
        .expect("hello_world result");
    common::check_ok_detail(&result, "hello world, too");
    assert!(result.is_completed);

    client.close_app().expect("close");
    app_join.join().expect("app join");
}

// ---------------------------------------------------------------------
// Node properties from the graph definition are visible to the
// extension.
// ---------------------------------------------------------------------

struct PropReader;

impl Extension for PropReader {
    fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Cmd) {
        assert_eq!(cmd.name, "hello_world");
        let value = env.get_property_i32("test_prop").expect("node property");
        assert_eq!(value, 1568);

        let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        result
            .set_property("detail", "hello world, too")
            .expect("set detail");
        env.return_result(result).expect("client reachable");
    }
}

#[test]
fn node_property_reaches_extension() {
    let uri = "test://property-connect";
    let mut registry = AddonRegistry::new();
    registry.register("prop_reader", || PropReader);

    let (client, app_join) = common::spawn_app(registry, uri);
    let graph_id = common::start_graph(
        &client,
        r#"{
            "nodes": [{
                "type": "extension",
                "name": "reader",
                "addon": "prop_reader",
                "property": { "test_prop": 1568 }
            }]
        }"#,
    );

    let result = client
        .send_cmd_and_recv_result(common::cmd_to("hello_world", uri, &graph_id, "reader"))
        .expect("result");
    common::check_ok_detail(&result, "hello world, too");

    client.close_app().expect("close");
    app_join.join().expect("app join");
}

// ---------------------------------------------------------------------
// Multi-result commands: two responders, each streaming intermediate
// results; the forwarder surfaces every one and answers the client
// with the fifth.
// ---------------------------------------------------------------------

struct Forwarder {
    seen: Arc<AtomicUsize>,
}

impl Extension for Forwarder {
    fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Cmd) {
        assert_eq!(cmd.name, "hello_world");
        let original = cmd.clone();
        let seen = Arc::clone(&self.seen);
        env.send_cmd_ex(cmd, move |env, result, err| {
            assert!(err.is_none(), "unexpected error: {err:?}");
            let result = result.expect("result present");
            let count = seen.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(result.is_final, count == 5, "only the last is final");
            if result.is_final {
                let mut reply = CmdResult::from_cmd(StatusCode::Ok, &original);
                let detail = result.get_property_string("detail").expect("detail");
                reply.set_property("detail", detail).expect("set detail");
                env.return_result(reply).expect("client reachable");
            }
        })
        .expect("route declared");
    }
}

/// Streams `count` results; all but the last marked intermediate.
struct Streamer {
    tag: &'static str,
    count: usize,
}

impl Extension for Streamer {
    fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Cmd) {
        for i in 1..=self.count {
            let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
            result.set_final(i == self.count);
            result
                .set_property("detail", format!("from {}, {i}", self.tag))
                .expect("set detail");
            env.return_result(result).expect("forwarder reachable");
        }
    }
}

#[test]
fn multi_result_fan_out() {
    let uri = "test://multiple-results";
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_factory = Arc::clone(&seen);

    let mut registry = AddonRegistry::new();
    registry.register("forwarder", move || Forwarder {
        seen: Arc::clone(&seen_factory),
    });
    registry.register("streamer_two", || Streamer { tag: "two", count: 2 });
    registry.register("streamer_three", || Streamer { tag: "three", count: 3 });

    let (client, app_join) = common::spawn_app(registry, uri);
    let graph_id = common::start_graph(
        &client,
        r#"{
            "nodes": [
                { "type": "extension", "name": "fwd", "addon": "forwarder",
                  "extension_group": "shared" },
                { "type": "extension", "name": "two", "addon": "streamer_two",
                  "extension_group": "shared" },
                { "type": "extension", "name": "three", "addon": "streamer_three",
                  "extension_group": "shared" }
            ],
            "connections": [{
                "extension": "fwd",
                "cmd": [{ "name": "hello_world",
                          "dest": [{ "extension": "two" }, { "extension": "three" }] }]
            }]
        }"#,
    );

    let result = client
        .send_cmd_and_recv_result(common::cmd_to("hello_world", uri, &graph_id, "fwd"))
        .expect("result");
    assert!(result.status_code.is_ok());
    let detail = result.get_property_string("detail").expect("detail");
    assert!(
        detail == "from two, 2" || detail == "from three, 3",
        "final came from one of the streamers, got {detail:?}"
    );
    assert_eq!(seen.load(Ordering::SeqCst), 5, "2 + 3 results surfaced");

    client.close_app().expect("close");
    app_join.join().expect("app join");
}
