//! Typed request helpers for [`PortolanClient`].

use std::net::IpAddr;

use uuid::Uuid;

use super::{ClientError, PortolanClient, runtime::ClientStream};
use crate::{
    message::{
        Envelope,
        LogAck,
        LogRemove,
        LogRemoveAck,
        LogRequest,
        Message,
        RouteAck,
        RouteRequest,
        Vl2Ack,
        Vl2Request,
        Vl3Ack,
        Vl3Request,
    },
    protocol::{MacAddress, Opcode, to_wire_ip},
};

fn unexpected(expected: Opcode, response: &Envelope) -> ClientError {
    ClientError::UnexpectedResponse {
        expected,
        received: response.opcode(),
    }
}

impl<T> PortolanClient<T>
where
    T: ClientStream,
{
    /// Check that the peer is alive.
    ///
    /// # Errors
    ///
    /// See [`PortolanClient::call`].
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        let response = self.call(Message::Ping).await?;
        match response.message {
            Message::Pong => Ok(()),
            _ => Err(unexpected(Opcode::Pong, &response)),
        }
    }

    /// Resolve the underlay endpoint for `mac` on `vnet_id`.
    ///
    /// # Errors
    ///
    /// See [`PortolanClient::call`].
    pub async fn vl2(&mut self, mac: MacAddress, vnet_id: u32) -> Result<Vl2Ack, ClientError> {
        let response = self
            .call(Message::Vl2Request(Vl2Request { mac, vnet_id }))
            .await?;
        match response.message {
            Message::Vl2Ack(ack) => Ok(ack),
            _ => Err(unexpected(Opcode::Vl2Ack, &response)),
        }
    }

    /// Resolve the MAC and underlay endpoint for `ip` on `vnet_id`.
    ///
    /// # Errors
    ///
    /// See [`PortolanClient::call`].
    pub async fn vl3(&mut self, ip: IpAddr, vnet_id: u32) -> Result<Vl3Ack, ClientError> {
        let request = Vl3Request {
            ip: to_wire_ip(ip),
            vnet_id,
        };
        let response = self.call(Message::Vl3Request(request)).await?;
        match response.message {
            Message::Vl3Ack(ack) => Ok(ack),
            _ => Err(unexpected(Opcode::Vl3Ack, &response)),
        }
    }

    /// Fetch pending log entries for the compute node whose underlay address
    /// is `ip`.
    ///
    /// # Errors
    ///
    /// See [`PortolanClient::call`].
    pub async fn log(&mut self, ip: IpAddr, byte_budget: u32) -> Result<LogAck, ClientError> {
        let request = LogRequest {
            ip: to_wire_ip(ip),
            byte_budget,
        };
        let response = self.call(Message::LogRequest(request)).await?;
        match response.message {
            Message::LogAck(ack) => Ok(ack),
            _ => Err(unexpected(Opcode::LogAck, &response)),
        }
    }

    /// Acknowledge processed log entries.
    ///
    /// # Errors
    ///
    /// See [`PortolanClient::call`].
    pub async fn log_remove(&mut self, ids: Vec<Uuid>) -> Result<LogRemoveAck, ClientError> {
        let response = self.call(Message::LogRemove(LogRemove { ids })).await?;
        match response.message {
            Message::LogRemoveAck(ack) => Ok(ack),
            _ => Err(unexpected(Opcode::LogRemoveAck, &response)),
        }
    }

    /// Resolve a cross-network route.
    ///
    /// # Errors
    ///
    /// See [`PortolanClient::call`].
    pub async fn route(&mut self, request: RouteRequest) -> Result<RouteAck, ClientError> {
        let response = self.call(Message::RouteRequest(request)).await?;
        match response.message {
            Message::RouteAck(ack) => Ok(ack),
            _ => Err(unexpected(Opcode::RouteAck, &response)),
        }
    }
}
