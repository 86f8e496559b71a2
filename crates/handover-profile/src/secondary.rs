//! Secondary side: reacts to handover packets as they arrive.

use std::time::Instant;

use bytes::Bytes;
use handover_frame::{
    claim_space, decode_message, hex_dump, opcode_name, wait_for_packet, BdAddr, FrameError,
    MarshalCursor, MarshalEntry, ProtocolMessage, StartRequest, StartStatus, CANCEL_IND, END_TAG,
    MARSHAL_DATA, START_CFM, START_REQ, UNMARSHAL_COMPLETE_IND, UNMARSHAL_P1_CFM,
};
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionState;
use crate::error::{ProtocolFault, Result};
use crate::event::ProfileEvent;
use crate::platform::LinkMode;
use crate::profile::HandoverProfile;
use crate::protocol::MarshalState;

impl HandoverProfile {
    /// Handle whatever the peer has sent.
    ///
    /// Call when the channel becomes readable. Once a `START_REQ` is
    /// accepted this keeps reading, each packet bounded by the protocol
    /// message timeout, until the handover completes, is cancelled or stalls.
    pub fn process_handover_message(&mut self) -> Result<()> {
        let Some(mut packet) = self.peek_packet() else {
            return Ok(());
        };

        loop {
            let size = packet.len();
            let Some(&opcode) = packet.first() else {
                self.drop_packet(size)?;
                return Ok(());
            };

            let mut block = true;
            let mut complete = false;
            match opcode {
                START_REQ => {
                    self.request_performance();
                    block = self.process_start_req(&packet)?;
                    self.acl_handle = self.platform.mirror.mirror_acl_handle();
                }
                CANCEL_IND => {
                    self.handle_cancel_ind()?;
                    block = false;
                }
                MARSHAL_DATA => complete = self.process_marshal_data(&packet)?,
                START_CFM | UNMARSHAL_P1_CFM | UNMARSHAL_COMPLETE_IND => {
                    debug!(opcode = opcode_name(opcode), "ignored on the secondary");
                }
                other => {
                    error!(opcode = other, packet = %hex_dump(&packet), "unexpected opcode");
                    return Err(ProtocolFault::UnexpectedOpcode(other));
                }
            }

            self.drop_packet(size)?;

            if !block {
                self.relinquish_performance();
                return Ok(());
            }
            if complete {
                return self.complete_as_secondary();
            }

            let timeout = self.config.protocol_message_timeout;
            let next = self
                .channel
                .as_ref()
                .and_then(|channel| wait_for_packet(&channel.source, timeout));
            match next {
                Some(next) => packet = next,
                None => return self.secondary_timed_out(opcode),
            }
        }
    }

    fn peek_packet(&self) -> Option<Bytes> {
        let source = &self.channel.as_ref()?.source;
        if source.boundary() == 0 {
            return None;
        }
        source.map()
    }

    fn drop_packet(&mut self, size: usize) -> Result<()> {
        if let Some(channel) = self.channel.as_mut() {
            channel.source.drop_bytes(size)?;
        }
        Ok(())
    }

    /// Answer a `START_REQ`. Returns true if the handover was accepted.
    fn process_start_req(&mut self, packet: &Bytes) -> Result<bool> {
        if self.is_primary || self.state != ConnectionState::Connected {
            warn!(is_primary = self.is_primary, state = %self.state, "START_REQ ignored");
            return Ok(false);
        }

        let req = match decode_message(packet) {
            Ok(ProtocolMessage::StartReq(req)) => req,
            Ok(_) => return Ok(false),
            Err(err) => {
                warn!(%err, packet = %hex_dump(packet), "bad START_REQ");
                return Ok(false);
            }
        };
        debug!(session_id = req.session_id, handset = %req.handset_addr, "START_REQ");

        if self.marshal_state != MarshalState::Idle {
            warn!(state = %self.marshal_state, "new START_REQ replaces an unfinished handover");
            self.clients.abort_all();
            self.p1_complete = false;
            self.set_marshal_state(MarshalState::Idle);
        }

        let status = if self.consistency_veto(&req) {
            StartStatus::Vetoed
        } else {
            self.handset_addr = Some(req.handset_addr);
            self.p1_complete = false;
            StartStatus::Success
        };

        let cfm = ProtocolMessage::StartCfm {
            session_id: req.session_id,
            status,
        };
        let timeout = self.config.protocol_message_timeout;
        if self.send_control(&cfm, timeout).is_err() {
            return Ok(false);
        }
        Ok(status == StartStatus::Success)
    }

    /// True if this side's link state disagrees with what the primary sent.
    fn consistency_veto(&self, req: &StartRequest) -> bool {
        let mirror = &self.platform.mirror;
        if mirror.last_rx_seq() != req.last_tx_seq || mirror.last_tx_seq() != req.last_rx_seq {
            info!(
                local_tx = mirror.last_tx_seq(),
                local_rx = mirror.last_rx_seq(),
                peer_tx = req.last_tx_seq,
                peer_rx = req.last_rx_seq,
                "signalling still in flight, vetoing"
            );
            return true;
        }
        if mirror.mirror_state() != req.mirror_state {
            info!(
                local = mirror.mirror_state(),
                peer = req.mirror_state,
                "mirror state differs, vetoing"
            );
            return true;
        }
        if mirror.veto() {
            info!("mirror vetoed");
            return true;
        }
        if mirror.has_handset_instance(&req.handset_addr) {
            info!(handset = %req.handset_addr, "handset instance already exists, vetoing");
            return true;
        }
        false
    }

    /// Consume one `MARSHAL_DATA` packet. Returns true once the whole
    /// handover has been received.
    fn process_marshal_data(&mut self, packet: &Bytes) -> Result<bool> {
        if self.is_primary {
            return Err(ProtocolFault::usage("marshal data received on the primary"));
        }
        let payload = packet.slice(1..);
        let handset = self.handset_addr.unwrap_or(BdAddr::ZERO);

        match payload.first() {
            None => return Ok(false),
            Some(&END_TAG) if payload.len() != 1 => {
                return Err(malformed(packet, "data after end tag"));
            }
            Some(&END_TAG)
                if self.marshal_state == MarshalState::P0Marshalling || self.p1_complete =>
            {
                debug!("end of handover data");
                return Ok(true);
            }
            _ => {}
        }

        let mut cursor = MarshalCursor::new(payload.clone(), self.clients.len());
        let first = cursor.next_entry().map_err(|err| frame_fault(packet, err))?;

        if let Some(MarshalEntry::P0(data)) = &first {
            if !data.is_empty() {
                return self.unmarshal_p0(packet, data, &mut cursor);
            }
        }

        if self.marshal_state == MarshalState::P0Marshalling {
            return Err(malformed(packet, "client data after baseband data"));
        }
        let mut entry = first;
        self.set_marshal_state(MarshalState::P1Marshalling);
        // Every client entry of one packet must be absorbed before this.
        let deadline = Instant::now() + self.config.p1_unmarshal_timeout;
        loop {
            match entry {
                None => break,
                Some(MarshalEntry::Client { id, data }) => {
                    if Instant::now() >= deadline {
                        error!(
                            client = id,
                            packet = %hex_dump(packet),
                            "P1 unmarshal overran its deadline"
                        );
                        return Err(ProtocolFault::P1UnmarshalTimeout { client: id });
                    }
                    let client = self
                        .clients
                        .get_mut(usize::from(id))
                        .ok_or(ProtocolFault::UnknownClient(id))?;
                    let progress = client.unmarshal(&handset, &data);
                    if progress.consumed != data.len() {
                        error!(client = id, packet = %hex_dump(packet), "client consumed the wrong length");
                        return Err(ProtocolFault::ClientConsumedMismatch {
                            client: id,
                            declared: data.len(),
                            consumed: progress.consumed,
                        });
                    }
                }
                Some(MarshalEntry::End) => {
                    if cursor.remaining() != 0 {
                        return Err(malformed(packet, "data after end tag"));
                    }
                    self.p1_complete = true;
                    debug!("P1 state received");
                    let timeout = self.config.protocol_message_timeout;
                    if self
                        .send_control(&ProtocolMessage::UnmarshalP1Cfm, timeout)
                        .is_err()
                    {
                        warn!("UNMARSHAL_P1_CFM not sent, aborting");
                        self.clients.abort_all();
                    }
                    break;
                }
                Some(MarshalEntry::P0(_)) => {
                    return Err(malformed(packet, "baseband entry inside client data"));
                }
            }
            entry = cursor.next_entry().map_err(|err| frame_fault(packet, err))?;
        }

        if cursor.consumed() != payload.len() {
            return Err(malformed(packet, "trailing bytes"));
        }
        Ok(false)
    }

    /// Hand baseband bytes to the controller.
    fn unmarshal_p0(
        &mut self,
        packet: &Bytes,
        data: &Bytes,
        cursor: &mut MarshalCursor,
    ) -> Result<bool> {
        if self.marshal_state == MarshalState::Idle {
            debug!(len = data.len(), "baseband data before client data ignored");
            return Ok(false);
        }

        if self.marshal_sink.is_none() {
            let handset = self.handset_addr.unwrap_or(BdAddr::ZERO);
            self.marshal_sink = self.platform.acl.marshal_sink(&handset);
        }
        let sink = self
            .marshal_sink
            .as_mut()
            .ok_or(ProtocolFault::MarshalSinkUnavailable)?;
        claim_space(&**sink, data.len(), self.config.p0_unmarshal_timeout).map_err(|err| {
            error!(%err, len = data.len(), "baseband sink claim failed");
            ProtocolFault::MarshalSinkUnavailable
        })?;
        sink.flush(data)?;
        self.set_marshal_state(MarshalState::P0Marshalling);
        debug!(len = data.len(), "baseband state applied");

        match cursor.next_entry().map_err(|err| frame_fault(packet, err))? {
            None => Ok(false),
            Some(MarshalEntry::End) if cursor.remaining() == 0 => Ok(true),
            Some(_) => Err(malformed(packet, "unexpected entry after baseband data")),
        }
    }

    fn complete_as_secondary(&mut self) -> Result<()> {
        let handset = self.handset_addr.unwrap_or(BdAddr::ZERO);
        let a2dp = self.platform.mirror.is_a2dp_active();

        if !a2dp {
            self.clients.commit_all(true);
        }
        let handle = self
            .acl_handle
            .ok_or_else(|| ProtocolFault::usage("no mirrored link to commit"))?;
        if !self.platform.acl.handover_commit(handle) {
            error!(acl_handle = handle, "link-layer commit failed");
            return Err(ProtocolFault::CommitFailed { acl_handle: handle });
        }
        if a2dp {
            self.platform.mirror.commit_role(&handset, true);
        }
        self.platform.power.request_peer_link_mode(LinkMode::Sniff);
        if a2dp {
            self.clients.commit_all(true);
        }

        self.clients.complete_all(true);
        if !self
            .platform
            .power
            .wait_for_peer_link_mode(LinkMode::Sniff, self.config.reenter_sniff_timeout)
        {
            debug!("peer link not back in sniff yet");
        }

        self.relinquish_performance();
        self.marshal_sink = None;
        self.p1_complete = false;
        self.set_marshal_state(MarshalState::Idle);
        self.is_primary = true;
        self.refresh_peer_addr();
        info!(handset = %handset, "handover complete, now primary");
        self.notify(ProfileEvent::HandoverCompleteInd { is_primary: true });
        Ok(())
    }

    fn secondary_timed_out(&mut self, last_opcode: u8) -> Result<()> {
        warn!(last = opcode_name(last_opcode), state = %self.marshal_state, "handover data stalled");
        if last_opcode == MARSHAL_DATA {
            match self.marshal_state {
                MarshalState::P0Marshalling => return Err(ProtocolFault::P0TransferTimeout),
                MarshalState::P1Marshalling => {
                    self.clients.abort_all();
                    self.p1_complete = false;
                    self.set_marshal_state(MarshalState::Idle);
                }
                MarshalState::Idle => {}
            }
        }
        self.relinquish_performance();
        Ok(())
    }
}

fn malformed(packet: &[u8], what: &str) -> ProtocolFault {
    error!(packet = %hex_dump(packet), "malformed marshal data: {what}");
    ProtocolFault::MalformedFrame(what.to_string())
}

fn frame_fault(packet: &[u8], err: FrameError) -> ProtocolFault {
    error!(packet = %hex_dump(packet), %err, "malformed marshal data");
    match err {
        FrameError::UnknownTag(tag) => ProtocolFault::UnknownClient(tag),
        err => ProtocolFault::MalformedFrame(err.to_string()),
    }
}
