// SPDX-License-Identifier: Apache-2.0
//! The receiver-side stream client.
//!
//! Feeds on the two websocket frame types: text frames become headers,
//! binary frames become chunk bytes for the most recently announced
//! payload-bearing item. Protocol damage (malformed headers, orphan chunks,
//! overflowing payloads, unknown back-references) is logged and dropped so
//! one bad frame does not tear down the scene built so far.

use std::collections::HashMap;

use trickle_proto::{decode_header, ContentId, Header};

use crate::assemble::{AssembleError, BufferAssembler};
use crate::decode::GraphDecoder;
use crate::port::ScenePort;

struct Assembling {
    assembler: BufferAssembler,
    attribute: String,
    is_animation: bool,
}

struct ChannelBinding {
    id: ContentId,
    animation: String,
    input: ContentId,
    output: ContentId,
}

/// Stream client driving a [`ScenePort`].
pub struct StreamClient<P: ScenePort> {
    port: P,
    decoder: GraphDecoder<P::Handle>,
    assemblers: HashMap<ContentId, Assembling>,
    channels: Vec<ChannelBinding>,
    param_elements: HashMap<ContentId, u64>,
    current: Option<ContentId>,
    complete: bool,
    failed: Option<String>,
}

impl<P: ScenePort> StreamClient<P> {
    /// Client over a fresh scene.
    pub fn new(port: P) -> Self {
        StreamClient {
            port,
            decoder: GraphDecoder::new(),
            assemblers: HashMap::new(),
            channels: Vec::new(),
            param_elements: HashMap::new(),
            current: None,
            complete: false,
            failed: None,
        }
    }

    /// The driven port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the client, returning the port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// True once the sender declared the stream complete.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Fatal condition reported by the sender, if any.
    pub fn failure(&self) -> Option<&str> {
        self.failed.as_deref()
    }

    /// Apply one text frame. A frame that is not a decodable header is a
    /// protocol error: logged and dropped, the session continues.
    pub fn on_text(&mut self, text: &str) {
        match decode_header(text) {
            Ok(header) => {
                tracing::trace!(kind = header.kind_name(), "header");
                self.apply(header);
            }
            Err(err) => tracing::warn!(%err, "undecodable header; dropped"),
        }
    }

    fn apply(&mut self, header: Header) {
        match header {
            Header::AssetInfo { info } => self.port.asset_info(&info),
            Header::BufferItem(item) => {
                self.decoder.place(&mut self.port, &item.hierarchy);
                self.open_assembler(
                    item.id,
                    item.element_type,
                    item.component_type,
                    item.count,
                    &item.attribute,
                    item.animation.is_some(),
                );
            }
            Header::SkinItem(item) => {
                self.decoder.place(&mut self.port, &item.joints);
                self.decoder.place(&mut self.port, &item.hierarchy);
                self.port.announce_skin(&item);
                self.open_assembler(
                    item.id,
                    item.element_type,
                    item.component_type,
                    item.count,
                    "skin",
                    false,
                );
            }
            Header::TextureItem(item) => self.port.announce_texture(&item),
            Header::TexturePath { id, path } => self.port.set_texture_source(id, &path),
            Header::MaterialItem(item) => {
                self.decoder.place(&mut self.port, &item.hierarchy);
                self.port.apply_material(&item);
            }
            Header::MaterialParams { id, technique, values } => {
                self.port.apply_material_params(id, technique.as_deref(), &values);
            }
            Header::CameraItem(item) => {
                self.decoder.place(&mut self.port, &item.hierarchy);
                self.port.apply_camera(&item);
            }
            Header::AnimationChannelItem(item) => {
                self.decoder.place(&mut self.port, &item.hierarchy);
                self.port.apply_channel(&item);
                self.param_elements.entry(item.input).or_insert(0);
                self.param_elements.entry(item.output).or_insert(0);
                self.channels.push(ChannelBinding {
                    id: item.id,
                    animation: item.animation,
                    input: item.input,
                    output: item.output,
                });
                self.report_progress(item.input);
            }
            Header::Warning { message } => tracing::warn!(%message, "sender warning"),
            Header::Error { message } => {
                tracing::error!(%message, "sender error");
                self.failed = Some(message);
            }
            Header::StreamComplete => {
                self.complete = true;
                self.port.stream_complete();
            }
            other @ (Header::AssetRequest { .. }
            | Header::SortConfig { .. }
            | Header::PriorityHint { .. }) => {
                tracing::warn!(kind = other.kind_name(), "sender-bound header received; dropped");
            }
        }
    }

    fn open_assembler(
        &mut self,
        id: ContentId,
        element_type: trickle_asset::ElementType,
        component_type: trickle_asset::ComponentType,
        count: u64,
        attribute: &str,
        is_animation: bool,
    ) {
        if !self.assemblers.contains_key(&id) {
            match BufferAssembler::new(element_type, component_type, count) {
                Ok(assembler) => {
                    self.assemblers.insert(
                        id,
                        Assembling {
                            assembler,
                            attribute: attribute.to_owned(),
                            is_animation,
                        },
                    );
                }
                Err(err) => {
                    tracing::warn!(%id, %err, "undeliverable item announced; ignoring");
                    return;
                }
            }
        }
        self.current = Some(id);
    }

    /// Apply one binary frame. Chunks always belong to the most recent
    /// payload-bearing header; anything else is dropped with a warning.
    pub fn on_binary(&mut self, bytes: &[u8]) {
        let Some(id) = self.current else {
            tracing::warn!(len = bytes.len(), "binary frame with no announced item; dropped");
            return;
        };
        let Some(entry) = self.assemblers.get_mut(&id) else {
            tracing::warn!(%id, "binary frame for unknown item; dropped");
            return;
        };
        match entry.assembler.push(bytes) {
            Err(AssembleError::Overflow { count }) => {
                tracing::warn!(%id, count, "payload overflow; chunk dropped");
            }
            Err(err) => tracing::warn!(%id, %err, "chunk dropped"),
            Ok(None) => {}
            Ok(Some((offset, data))) => {
                let attribute = entry.attribute.clone();
                let complete = entry.assembler.is_complete();
                let received = entry.assembler.elements_received();
                let is_animation = entry.is_animation;
                self.port.write_elements(id, &attribute, offset, &data);
                if is_animation {
                    self.param_elements.insert(id, received);
                    self.report_progress(id);
                }
                if complete {
                    self.port.item_complete(id);
                    self.current = None;
                }
            }
        }
    }

    /// Report playable keyframes for every channel touching `param`: the
    /// minimum of its delivered input and output elements.
    fn report_progress(&mut self, param: ContentId) {
        for binding in &self.channels {
            if binding.input != param && binding.output != param {
                continue;
            }
            let input = self.param_elements.get(&binding.input).copied().unwrap_or(0);
            let output = self.param_elements.get(&binding.output).copied().unwrap_or(0);
            let playable = input.min(output);
            if playable > 0 {
                self.port.channel_progress(&binding.animation, binding.id, playable);
            }
        }
    }
}
