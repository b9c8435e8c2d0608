//! UDP 链路后端
//!
//! 在工作站上用一个已连接的非阻塞 UDP socket 代替无线串口，
//! 以便和控制台模拟器联调。每个数据报被当作一段串口字节流。

use crate::{HalError, SerialRx, SerialTx, SplittableLink};
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::trace;

fn recv_nonblocking(socket: &UdpSocket, buf: &mut [u8]) -> Result<usize, HalError> {
    match socket.recv(buf) {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
        // 对端尚未启动时 ICMP 不可达会表现为 ConnectionRefused，视为暂时没有数据
        Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
            trace!("UDP peer unreachable");
            Ok(0)
        },
        Err(e) => Err(e.into()),
    }
}

fn send_all(socket: &UdpSocket, bytes: &[u8]) -> Result<(), HalError> {
    let sent = socket.send(bytes)?;
    if sent != bytes.len() {
        return Err(HalError::Device(format!("short UDP send: {} of {} bytes", sent, bytes.len())));
    }
    Ok(())
}

/// 非阻塞 UDP 链路
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
}

impl UdpLink {
    /// 绑定本地地址并连接到控制台地址
    pub fn connect(local: impl ToSocketAddrs, console: impl ToSocketAddrs) -> Result<Self, HalError> {
        let socket = UdpSocket::bind(local)?;
        socket.connect(console)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, HalError> {
        Ok(self.socket.local_addr()?)
    }
}

impl SerialRx for UdpLink {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, HalError> {
        recv_nonblocking(&self.socket, buf)
    }
}

impl SerialTx for UdpLink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        send_all(&self.socket, bytes)
    }
}

/// UDP 链路接收端
#[derive(Debug)]
pub struct UdpRx {
    socket: UdpSocket,
}

/// UDP 链路发送端
#[derive(Debug)]
pub struct UdpTx {
    socket: UdpSocket,
}

impl SerialRx for UdpRx {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, HalError> {
        recv_nonblocking(&self.socket, buf)
    }
}

impl SerialTx for UdpTx {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        send_all(&self.socket, bytes)
    }
}

impl SplittableLink for UdpLink {
    type Rx = UdpRx;
    type Tx = UdpTx;

    fn split(self) -> Result<(UdpRx, UdpTx), HalError> {
        let tx_socket = self.socket.try_clone()?;
        Ok((UdpRx { socket: self.socket }, UdpTx { socket: tx_socket }))
    }
}
