//! The five envelope kinds and their shared header contract.
//!
//! # Header
//!
//! Every envelope carries `name`, `src`, `dests`, and a property tree.
//! The [`Message`] trait exposes that header uniformly, together with
//! path-addressed typed property access.
//!
//! # Result capture
//!
//! [`CmdResult::from_cmd`] snapshots the originating command's
//! correlation id and source loc, which is all the runtime needs to
//! route the result back without either side holding a reference to
//! the other.

use serde::{Deserialize, Serialize};
use weft_types::{CorrelationId, Loc, StatusCode};

use crate::{path, MsgError, OpaquePtr, PropertyMap, PropertyValue};

/// Discriminates the envelope kinds for routing tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgKind {
    /// Command expecting a result stream.
    Cmd,
    /// Result flowing back to a command originator.
    CmdResult,
    /// One-way opaque payload.
    Data,
    /// One-way PCM audio.
    AudioFrame,
    /// One-way video frame.
    VideoFrame,
}

impl MsgKind {
    /// Stable lowercase name, as used in graph connection JSON.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cmd => "cmd",
            Self::CmdResult => "cmd_result",
            Self::Data => "data",
            Self::AudioFrame => "audio_frame",
            Self::VideoFrame => "video_frame",
        }
    }
}

impl std::fmt::Display for MsgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! typed_int_getter {
    ($fn_name:ident, $ty:ty, $type_name:literal) => {
        /// Typed property getter; any integer variant that fits is
        /// accepted.
        fn $fn_name(&self, p: &str) -> Result<$ty, MsgError> {
            let value = self.require_property(p)?;
            value
                .to_i64()
                .and_then(|v| <$ty>::try_from(v).ok())
                .ok_or_else(|| MsgError::mismatch(p, $type_name, value.type_name()))
        }
    };
}

/// Shared header and property contract of all envelope kinds.
pub trait Message {
    /// Which envelope kind this is.
    fn kind(&self) -> MsgKind;

    /// Message name (routing key together with the kind).
    fn name(&self) -> &str;

    /// Source loc. Empty until the runtime stamps it at send time.
    fn src(&self) -> &Loc;

    /// Overrides the source loc.
    fn set_src(&mut self, src: Loc);

    /// Explicit destinations. Empty means "resolve from the graph's
    /// connection table".
    fn dests(&self) -> &[Loc];

    /// Replaces the destination list.
    fn set_dests(&mut self, dests: Vec<Loc>);

    /// Property tree, read-only.
    fn properties(&self) -> &PropertyMap;

    /// Property tree, mutable.
    fn properties_mut(&mut self) -> &mut PropertyMap;

    /// Reads the property at a dot-separated path.
    ///
    /// # Errors
    ///
    /// `MSG_INVALID_ARGUMENT` for a malformed path.
    fn get_property(&self, p: &str) -> Result<Option<&PropertyValue>, MsgError> {
        path::get(self.properties(), p)
    }

    /// Writes a property at a dot-separated path, creating
    /// intermediate objects.
    fn set_property(
        &mut self,
        p: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), MsgError> {
        path::set(self.properties_mut(), p, value.into())
    }

    /// Reads a property, failing when absent.
    fn require_property(&self, p: &str) -> Result<&PropertyValue, MsgError> {
        self.get_property(p)?
            .ok_or_else(|| MsgError::InvalidArgument(format!("property not found: '{p}'")))
    }

    typed_int_getter!(get_property_i8, i8, "i8");
    typed_int_getter!(get_property_i16, i16, "i16");
    typed_int_getter!(get_property_i32, i32, "i32");
    typed_int_getter!(get_property_i64, i64, "i64");
    typed_int_getter!(get_property_u8, u8, "u8");
    typed_int_getter!(get_property_u16, u16, "u16");
    typed_int_getter!(get_property_u32, u32, "u32");

    /// Typed property getter for `u64`.
    fn get_property_u64(&self, p: &str) -> Result<u64, MsgError> {
        let value = self.require_property(p)?;
        value
            .to_u64()
            .ok_or_else(|| MsgError::mismatch(p, "u64", value.type_name()))
    }

    /// Typed property getter for `bool`.
    fn get_property_bool(&self, p: &str) -> Result<bool, MsgError> {
        let value = self.require_property(p)?;
        value
            .as_bool()
            .ok_or_else(|| MsgError::mismatch(p, "bool", value.type_name()))
    }

    /// Typed property getter for `f64`; accepts either float width.
    fn get_property_f64(&self, p: &str) -> Result<f64, MsgError> {
        let value = self.require_property(p)?;
        value
            .to_f64()
            .ok_or_else(|| MsgError::mismatch(p, "f64", value.type_name()))
    }

    /// Typed property getter for strings.
    fn get_property_string(&self, p: &str) -> Result<String, MsgError> {
        let value = self.require_property(p)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MsgError::mismatch(p, "string", value.type_name()))
    }

    /// Typed property getter for byte buffers.
    fn get_property_bytes(&self, p: &str) -> Result<Vec<u8>, MsgError> {
        let value = self.require_property(p)?;
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| MsgError::mismatch(p, "bytes", value.type_name()))
    }

    /// Typed property getter for opaque pointers.
    fn get_property_ptr(&self, p: &str) -> Result<OpaquePtr, MsgError> {
        let value = self.require_property(p)?;
        value
            .as_ptr()
            .ok_or_else(|| MsgError::mismatch(p, "ptr", value.type_name()))
    }

    /// Returns `true` if any property value is an opaque pointer,
    /// which makes the envelope non-serializable.
    fn contains_opaque(&self) -> bool {
        self.properties().values().any(PropertyValue::contains_opaque)
    }
}

macro_rules! impl_message_header {
    ($ty:ty, $kind:expr) => {
        impl Message for $ty {
            fn kind(&self) -> MsgKind {
                $kind
            }
            fn name(&self) -> &str {
                &self.name
            }
            fn src(&self) -> &Loc {
                &self.src
            }
            fn set_src(&mut self, src: Loc) {
                self.src = src;
            }
            fn dests(&self) -> &[Loc] {
                &self.dests
            }
            fn set_dests(&mut self, dests: Vec<Loc>) {
                self.dests = dests;
            }
            fn properties(&self) -> &PropertyMap {
                &self.properties
            }
            fn properties_mut(&mut self) -> &mut PropertyMap {
                &mut self.properties
            }
        }
    };
}

/// A command: the only envelope kind that produces a result stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cmd {
    /// Command name.
    pub name: String,
    /// Sender loc, stamped by the runtime at send time.
    pub src: Loc,
    /// Explicit destinations; empty defers to the connection table.
    pub dests: Vec<Loc>,
    /// Property tree.
    pub properties: PropertyMap,
    /// Minted by the runtime at send time; `None` before that.
    pub correlation_id: Option<CorrelationId>,
}

impl Cmd {
    /// Creates a command with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            src: Loc::empty(),
            dests: Vec::new(),
            properties: PropertyMap::new(),
            correlation_id: None,
        }
    }
}

impl_message_header!(Cmd, MsgKind::Cmd);

/// A result flowing back to a command originator.
///
/// Results form a stream per correlation id: zero or more
/// intermediate results (`is_final == false`) followed by exactly one
/// final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdResult {
    /// Name of the original command.
    pub name: String,
    /// Responder loc, stamped at return time.
    pub src: Loc,
    /// Captured originator loc.
    pub dests: Vec<Loc>,
    /// Property tree.
    pub properties: PropertyMap,
    /// Correlation id captured from the original command.
    pub correlation_id: Option<CorrelationId>,
    /// Whether the command succeeded.
    pub status_code: StatusCode,
    /// Last result of this responder's stream. Defaults to `true`.
    pub is_final: bool,
    /// Whether the whole command completed normally. Set by the
    /// runtime on the overall-final result; implies `is_final`.
    pub is_completed: bool,
}

impl CmdResult {
    /// Builds a result for `cmd`, capturing its correlation id and
    /// originator so the runtime can route the response.
    #[must_use]
    pub fn from_cmd(status_code: StatusCode, cmd: &Cmd) -> Self {
        Self {
            name: cmd.name.clone(),
            src: Loc::empty(),
            dests: vec![cmd.src.clone()],
            properties: PropertyMap::new(),
            correlation_id: cmd.correlation_id,
            status_code,
            is_final: true,
            is_completed: false,
        }
    }

    /// Marks this result as intermediate (`false`) or final (`true`).
    ///
    /// Completion implies finality, so clearing the flag also clears
    /// `is_completed`.
    pub fn set_final(&mut self, is_final: bool) {
        self.is_final = is_final;
        if !is_final {
            self.is_completed = false;
        }
    }

    /// Returns `true` when the originator loc and correlation id were
    /// captured, i.e. this result can be routed.
    #[must_use]
    pub fn has_captured_source(&self) -> bool {
        self.correlation_id.is_some() && !self.dests.is_empty()
    }
}

impl_message_header!(CmdResult, MsgKind::CmdResult);

/// One-way opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    /// Message name.
    pub name: String,
    /// Sender loc.
    pub src: Loc,
    /// Explicit destinations.
    pub dests: Vec<Loc>,
    /// Property tree.
    pub properties: PropertyMap,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Data {
    /// Creates a data message with the given name and empty payload.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            src: Loc::empty(),
            dests: Vec::new(),
            properties: PropertyMap::new(),
            payload: Vec::new(),
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

impl_message_header!(Data, MsgKind::Data);

/// Sample layout of an audio frame buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioLayout {
    /// Channel samples interleaved frame by frame.
    #[default]
    Interleaved,
    /// One contiguous plane per channel.
    Planar,
}

/// One-way PCM audio frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Message name.
    pub name: String,
    /// Sender loc.
    pub src: Loc,
    /// Explicit destinations.
    pub dests: Vec<Loc>,
    /// Property tree.
    pub properties: PropertyMap,
    /// Raw PCM bytes.
    pub pcm: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub timestamp: i64,
    /// Samples per second.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Buffer layout.
    pub layout: AudioLayout,
}

impl AudioFrame {
    /// Creates an empty audio frame with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            src: Loc::empty(),
            dests: Vec::new(),
            properties: PropertyMap::new(),
            pcm: Vec::new(),
            timestamp: 0,
            sample_rate: 0,
            channels: 0,
            layout: AudioLayout::default(),
        }
    }
}

impl_message_header!(AudioFrame, MsgKind::AudioFrame);

/// Pixel layout of a video frame buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA.
    #[default]
    Rgba,
    /// 8-bit RGB, no alpha.
    Rgb24,
    /// Planar YUV 4:2:0.
    I420,
    /// Semi-planar YUV 4:2:0.
    Nv12,
}

/// One-way video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    /// Message name.
    pub name: String,
    /// Sender loc.
    pub src: Loc,
    /// Explicit destinations.
    pub dests: Vec<Loc>,
    /// Property tree.
    pub properties: PropertyMap,
    /// Raw pixel bytes in `pixel_format` layout.
    pub pixels: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub pixel_format: PixelFormat,
    /// Presentation timestamp in microseconds.
    pub timestamp: i64,
}

impl VideoFrame {
    /// Creates an empty video frame with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            src: Loc::empty(),
            dests: Vec::new(),
            properties: PropertyMap::new(),
            pixels: Vec::new(),
            width: 0,
            height: 0,
            pixel_format: PixelFormat::default(),
            timestamp: 0,
        }
    }
}

impl_message_header!(VideoFrame, MsgKind::VideoFrame);

/// Sum type over all envelope kinds.
///
/// Used where a single channel carries mixed kinds (delivery tasks,
/// the byte codec, the tester bridge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    /// A command.
    Cmd(Cmd),
    /// A command result.
    CmdResult(CmdResult),
    /// A data message.
    Data(Data),
    /// An audio frame.
    AudioFrame(AudioFrame),
    /// A video frame.
    VideoFrame(VideoFrame),
}

macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Envelope::Cmd(m) => m.$method($($arg),*),
            Envelope::CmdResult(m) => m.$method($($arg),*),
            Envelope::Data(m) => m.$method($($arg),*),
            Envelope::AudioFrame(m) => m.$method($($arg),*),
            Envelope::VideoFrame(m) => m.$method($($arg),*),
        }
    };
}

impl Envelope {
    /// Serializes the envelope to bytes.
    ///
    /// # Errors
    ///
    /// `MSG_INVALID_ARGUMENT` when the envelope carries opaque pointer
    /// properties; `MSG_CODEC` on encoder failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MsgError> {
        if self.contains_opaque() {
            return Err(MsgError::InvalidArgument(
                "envelope with opaque pointer properties cannot leave the process".into(),
            ));
        }
        postcard::to_stdvec(self).map_err(|e| MsgError::Codec(e.to_string()))
    }

    /// Deserializes an envelope from bytes produced by
    /// [`Envelope::to_bytes`].
    ///
    /// # Errors
    ///
    /// `MSG_CODEC` on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MsgError> {
        postcard::from_bytes(bytes).map_err(|e| MsgError::Codec(e.to_string()))
    }
}

impl Message for Envelope {
    fn kind(&self) -> MsgKind {
        delegate!(self, kind)
    }
    fn name(&self) -> &str {
        delegate!(self, name)
    }
    fn src(&self) -> &Loc {
        delegate!(self, src)
    }
    fn set_src(&mut self, src: Loc) {
        delegate!(self, set_src, src)
    }
    fn dests(&self) -> &[Loc] {
        delegate!(self, dests)
    }
    fn set_dests(&mut self, dests: Vec<Loc>) {
        delegate!(self, set_dests, dests)
    }
    fn properties(&self) -> &PropertyMap {
        delegate!(self, properties)
    }
    fn properties_mut(&mut self) -> &mut PropertyMap {
        delegate!(self, properties_mut)
    }
}

impl From<Cmd> for Envelope {
    fn from(m: Cmd) -> Self {
        Self::Cmd(m)
    }
}
impl From<CmdResult> for Envelope {
    fn from(m: CmdResult) -> Self {
        Self::CmdResult(m)
    }
}
impl From<Data> for Envelope {
    fn from(m: Data) -> Self {
        Self::Data(m)
    }
}
impl From<AudioFrame> for Envelope {
    fn from(m: AudioFrame) -> Self {
        Self::AudioFrame(m)
    }
}
impl From<VideoFrame> for Envelope {
    fn from(m: VideoFrame) -> Self {
        Self::VideoFrame(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_result_captures_origin() {
        let mut cmd = Cmd::new("hello_world");
        cmd.src = Loc::new(Some("app://a"), Some("g"), Some("client"));
        cmd.correlation_id = Some(CorrelationId::new());

        let result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        assert_eq!(result.name, "hello_world");
        assert_eq!(result.dests, vec![cmd.src.clone()]);
        assert_eq!(result.correlation_id, cmd.correlation_id);
        assert!(result.is_final);
        assert!(!result.is_completed);
        assert!(result.has_captured_source());
    }

    #[test]
    fn result_without_capture_cannot_route() {
        let result = CmdResult::from_cmd(StatusCode::Ok, &Cmd::new("x"));
        // Cmd::new has no correlation id yet.
        assert!(!result.has_captured_source());
    }

    #[test]
    fn clearing_final_clears_completed() {
        let mut result = CmdResult::from_cmd(StatusCode::Ok, &Cmd::new("x"));
        result.is_completed = true;
        result.set_final(false);
        assert!(!result.is_final);
        assert!(!result.is_completed);
    }

    #[test]
    fn typed_getters_widen_integers() {
        let mut cmd = Cmd::new("t");
        cmd.set_property("n", 1568i64).expect("set");

        assert_eq!(cmd.get_property_i32("n").expect("get"), 1568);
        assert_eq!(cmd.get_property_u32("n").expect("get"), 1568);
        // Too narrow for the stored value.
        assert!(cmd.get_property_i8("n").is_err());
    }

    #[test]
    fn typed_getter_mismatch() {
        let mut cmd = Cmd::new("t");
        cmd.set_property("s", "text").expect("set");

        let err = cmd.get_property_i32("s").expect_err("mismatch");
        assert!(matches!(err, MsgError::TypeMismatch { .. }));
    }

    #[test]
    fn missing_property_is_invalid_argument() {
        let cmd = Cmd::new("t");
        assert!(matches!(
            cmd.get_property_string("nope"),
            Err(MsgError::InvalidArgument(_))
        ));
    }

    #[test]
    fn envelope_bytes_roundtrip() {
        let mut frame = AudioFrame::new("audio_frame");
        frame.pcm = vec![0, 1, 2, 255];
        frame.sample_rate = 16_000;
        frame.channels = 1;
        frame.timestamp = 42;
        frame.set_property("tag", PropertyValue::F32(1.25)).expect("set");

        let env = Envelope::from(frame);
        let bytes = env.to_bytes().expect("encode");
        let back = Envelope::from_bytes(&bytes).expect("decode");
        assert_eq!(env, back);
    }

    #[test]
    fn envelope_with_ptr_refuses_bytes() {
        let x = 9i32;
        let mut cmd = Cmd::new("t");
        cmd.set_property("p", OpaquePtr::from_ref(&x)).expect("set");

        let err = Envelope::from(cmd).to_bytes().expect_err("must refuse");
        assert!(matches!(err, MsgError::InvalidArgument(_)));
    }

    #[test]
    fn kind_names() {
        assert_eq!(MsgKind::AudioFrame.as_str(), "audio_frame");
        assert_eq!(MsgKind::Cmd.to_string(), "cmd");
    }
}
