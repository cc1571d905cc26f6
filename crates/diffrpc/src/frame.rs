//! # Protocol Frames
//!
//! Defines the request and reply envelopes.
//!
//! ## Layout
//! - Request: `Entry("Request") { Map { seq, op: Entry(<Op>) { Map { .. } } } }`
//! - Reply: `Entry("Reply") { Map { seq, ok: Entry(<Reply>) { Map { .. } } } }`,
//!   or `.. err: Map { kind, message } ..` on failure.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Forward Compatibility**: Unknown map fields are skipped.

use std::collections::HashMap;

use diffpack::Decoder;
use diffpack::Encoder;

use crate::error::Error;
use crate::error::Failure;
use crate::error::FailureKind;
use crate::error::Result;

/// An operation on the diffuser wire surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Create or replace the diffuser for `signature`.
    Create { signature: String, endpoints: Vec<(String, f64)>, serializer: String },
    /// Submit one invocation; answered with a request id.
    Execute {
        signature: String,
        arg_types: Vec<String>,
        return_type: String,
        args: Vec<Vec<u8>>,
        target: Vec<u8>,
    },
    Status { signature: String, request_id: String },
    /// Fetch a result, waiting for it if still running.
    Result { signature: String, request_id: String },
    Delete { signature: String },
    /// Fetch the raw bytes of a class the caller cannot resolve locally.
    Class { name: String },
}

impl Request {
    fn tag(&self) -> &'static str {
        match self {
            Request::Create { .. } => "Create",
            Request::Execute { .. } => "Execute",
            Request::Status { .. } => "Status",
            Request::Result { .. } => "Result",
            Request::Delete { .. } => "Delete",
            Request::Class { .. } => "Class",
        }
    }
}

/// The successful answer to a `Request`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Created { signature: String },
    Accepted { request_id: String },
    Status { ready: bool },
    Value { bytes: Vec<u8> },
    Deleted,
    Class { bytes: Vec<u8> },
}

impl Reply {
    fn tag(&self) -> &'static str {
        match self {
            Reply::Created { .. } => "Created",
            Reply::Accepted { .. } => "Accepted",
            Reply::Status { .. } => "Status",
            Reply::Value { .. } => "Value",
            Reply::Deleted => "Deleted",
            Reply::Class { .. } => "Class",
        }
    }
}

/// A request together with its correlation number.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    pub seq: u64,
    pub request: Request,
}

impl RequestFrame {
    pub fn new(seq: u64, request: Request) -> Self {
        Self { seq, request }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.entry_begin("Request")?;
        enc.map_begin()?;
        write_u64(enc, "seq", self.seq)?;

        enc.entry_begin("op")?;
        enc.entry_begin(self.request.tag())?;
        enc.map_begin()?;
        match &self.request {
            Request::Create { signature, endpoints, serializer } => {
                write_str(enc, "signature", signature)?;
                enc.entry_begin("endpoints")?;
                enc.list_begin()?;
                for (address, weight) in endpoints {
                    enc.map_begin()?;
                    write_str(enc, "address", address)?;
                    enc.entry_begin("weight")?;
                    enc.f64(*weight)?;
                    enc.entry_end()?;
                    enc.map_end()?;
                }
                enc.list_end()?;
                enc.entry_end()?;
                write_str(enc, "serializer", serializer)?;
            }
            Request::Execute { signature, arg_types, return_type, args, target } => {
                write_str(enc, "signature", signature)?;
                write_str_list(enc, "arg_types", arg_types)?;
                write_str(enc, "return_type", return_type)?;
                enc.entry_begin("args")?;
                enc.list_begin()?;
                for arg in args {
                    enc.bytes(arg)?;
                }
                enc.list_end()?;
                enc.entry_end()?;
                write_bytes(enc, "target", target)?;
            }
            Request::Status { signature, request_id } | Request::Result { signature, request_id } => {
                write_str(enc, "signature", signature)?;
                write_str(enc, "request_id", request_id)?;
            }
            Request::Delete { signature } => write_str(enc, "signature", signature)?,
            Request::Class { name } => write_str(enc, "name", name)?,
        }
        enc.map_end()?;
        enc.entry_end()?;
        enc.entry_end()?;

        enc.map_end()?;
        enc.entry_end()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes()?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut fields = open_frame(bytes, "Request")?;
        let seq = fields.take("seq")?.u64()?;
        let (op, mut body) = fields.take("op")?.entry()?;
        let mut f = Fields::read(&mut body)?;

        let request = match op {
            "Create" => {
                let mut endpoints = Vec::new();
                let mut list = f.take("endpoints")?.list()?;
                while let Some(mut item) = list.next()? {
                    let mut ep = Fields::read(&mut item)?;
                    endpoints.push((ep.string("address")?, ep.take("weight")?.f64()?));
                }
                Request::Create { signature: f.string("signature")?, endpoints, serializer: f.string("serializer")? }
            }
            "Execute" => {
                let mut args = Vec::new();
                let mut list = f.take("args")?.list()?;
                while let Some(mut item) = list.next()? {
                    args.push(item.bytes()?.to_vec());
                }
                Request::Execute {
                    signature: f.string("signature")?,
                    arg_types: f.string_list("arg_types")?,
                    return_type: f.string("return_type")?,
                    args,
                    target: f.take("target")?.bytes()?.to_vec(),
                }
            }
            "Status" => Request::Status { signature: f.string("signature")?, request_id: f.string("request_id")? },
            "Result" => Request::Result { signature: f.string("signature")?, request_id: f.string("request_id")? },
            "Delete" => Request::Delete { signature: f.string("signature")? },
            "Class" => Request::Class { name: f.string("name")? },
            other => return Err(Error::UnknownVariant(format!("request: {}", other))),
        };
        Ok(RequestFrame { seq, request })
    }
}

/// A reply together with the sequence number of the request it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyFrame {
    pub seq: u64,
    pub status: std::result::Result<Reply, Failure>,
}

impl ReplyFrame {
    pub fn ok(seq: u64, reply: Reply) -> Self {
        Self { seq, status: Ok(reply) }
    }

    pub fn err(seq: u64, failure: Failure) -> Self {
        Self { seq, status: Err(failure) }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.entry_begin("Reply")?;
        enc.map_begin()?;
        write_u64(enc, "seq", self.seq)?;

        match &self.status {
            Ok(reply) => {
                enc.entry_begin("ok")?;
                enc.entry_begin(reply.tag())?;
                enc.map_begin()?;
                match reply {
                    Reply::Created { signature } => write_str(enc, "signature", signature)?,
                    Reply::Accepted { request_id } => write_str(enc, "request_id", request_id)?,
                    Reply::Status { ready } => {
                        enc.entry_begin("ready")?;
                        enc.bool(*ready)?;
                        enc.entry_end()?;
                    }
                    Reply::Value { bytes } | Reply::Class { bytes } => write_bytes(enc, "bytes", bytes)?,
                    Reply::Deleted => {}
                }
                enc.map_end()?;
                enc.entry_end()?;
                enc.entry_end()?;
            }
            Err(failure) => {
                enc.entry_begin("err")?;
                enc.map_begin()?;
                write_str(enc, "kind", failure.kind.as_tag())?;
                write_str(enc, "message", &failure.message)?;
                enc.map_end()?;
                enc.entry_end()?;
            }
        }

        enc.map_end()?;
        enc.entry_end()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes()?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut fields = open_frame(bytes, "Reply")?;
        let seq = fields.take("seq")?.u64()?;

        if let Some(mut err) = fields.remove("err") {
            let mut f = Fields::read(&mut err)?;
            let kind = FailureKind::from_tag(&f.string("kind")?)?;
            return Ok(ReplyFrame::err(seq, Failure::new(kind, f.string("message")?)));
        }

        let (tag, mut body) = fields.take("ok")?.entry()?;
        let mut f = Fields::read(&mut body)?;
        let reply = match tag {
            "Created" => Reply::Created { signature: f.string("signature")? },
            "Accepted" => Reply::Accepted { request_id: f.string("request_id")? },
            "Status" => Reply::Status { ready: f.take("ready")?.bool()? },
            "Value" => Reply::Value { bytes: f.take("bytes")?.bytes()?.to_vec() },
            "Deleted" => Reply::Deleted,
            "Class" => Reply::Class { bytes: f.take("bytes")?.bytes()?.to_vec() },
            other => return Err(Error::UnknownVariant(format!("reply: {}", other))),
        };
        Ok(ReplyFrame::ok(seq, reply))
    }
}

/// Decodes just the sequence number from a raw frame of either direction.
///
/// Lets a server answer an undecodable request with the right correlation number.
pub fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let mut dec = Decoder::new(bytes);
    let (kind, mut body) = dec.entry()?;
    if kind != "Request" && kind != "Reply" {
        return Err(Error::UnknownVariant(format!("frame: {}", kind)));
    }

    let mut map = body.map()?;
    while let Some((key, mut val)) = map.next()? {
        if key == "seq" {
            return Ok(val.u64()?);
        }
        val.skip()?;
    }
    Err(Error::MissingField("seq"))
}

/// The fields of one map, indexed by name. Unknown names are simply never taken.
struct Fields<'a> {
    map: HashMap<&'a str, Decoder<'a>>,
}

impl<'a> Fields<'a> {
    fn read(dec: &mut Decoder<'a>) -> Result<Self> {
        let mut iter = dec.map()?;
        let mut map = HashMap::new();
        while let Some((key, val)) = iter.next()? {
            map.insert(key, val);
        }
        Ok(Self { map })
    }

    fn remove(&mut self, name: &str) -> Option<Decoder<'a>> {
        self.map.remove(name)
    }

    fn take(&mut self, name: &'static str) -> Result<Decoder<'a>> {
        self.map.remove(name).ok_or(Error::MissingField(name))
    }

    fn string(&mut self, name: &'static str) -> Result<String> {
        Ok(self.take(name)?.str()?.to_string())
    }

    fn string_list(&mut self, name: &'static str) -> Result<Vec<String>> {
        let mut list = self.take(name)?.list()?;
        let mut out = Vec::new();
        while let Some(mut item) = list.next()? {
            out.push(item.str()?.to_string());
        }
        Ok(out)
    }
}

fn open_frame<'a>(bytes: &'a [u8], expected: &str) -> Result<Fields<'a>> {
    let mut dec = Decoder::new(bytes);
    let (kind, mut body) = dec.entry()?;
    if kind != expected {
        return Err(Error::ProtocolViolation(format!("expected {} frame, got {}", expected, kind)));
    }
    Fields::read(&mut body)
}

fn write_u64(enc: &mut Encoder, key: &str, val: u64) -> Result<()> {
    enc.entry_begin(key)?;
    enc.u64(val)?;
    enc.entry_end()?;
    Ok(())
}

fn write_str(enc: &mut Encoder, key: &str, val: &str) -> Result<()> {
    enc.entry_begin(key)?;
    enc.str(val)?;
    enc.entry_end()?;
    Ok(())
}

fn write_bytes(enc: &mut Encoder, key: &str, val: &[u8]) -> Result<()> {
    enc.entry_begin(key)?;
    enc.bytes(val)?;
    enc.entry_end()?;
    Ok(())
}

fn write_str_list(enc: &mut Encoder, key: &str, vals: &[String]) -> Result<()> {
    enc.entry_begin(key)?;
    enc.list_begin()?;
    for val in vals {
        enc.str(val)?;
    }
    enc.list_end()?;
    enc.entry_end()?;
    Ok(())
}
