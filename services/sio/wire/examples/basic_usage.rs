//! Basic usage example for the sio wire protocol.

use bytes::BytesMut;
use sio_wire::{
    encode_frame, Event, FrameDecoder, Packet, PacketType, Payload, DEFAULT_MAX_FRAME_SIZE,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== sio Wire Protocol Example ===\n");

    // 1. Build an event that asks for an ack
    println!("1. Encoding an EVENT packet...");
    let packet = Packet::event(
        "/chat",
        Event::custom("message"),
        Payload::string("Hello, namespace!"),
        Some(42),
    );
    let body = packet.encode()?;
    let frame = encode_frame(&body, DEFAULT_MAX_FRAME_SIZE)?;
    println!("   Body {} bytes, frame {} bytes", body.len(), frame.len());

    // 2. Feed the frame back through a decoder in two pieces
    println!("\n2. Decoding from a split stream...");
    let mut decoder = FrameDecoder::new();
    let mut buf = BytesMut::from(&frame[..7]);
    println!("   After 7 bytes: {:?}", decoder.decode(&mut buf)?.map(|b| b.len()));

    buf.extend_from_slice(&frame[7..]);
    if let Some(body) = decoder.decode(&mut buf)? {
        let decoded = Packet::decode(body)?;
        println!("   Type: {:?}", decoded.typ());
        println!("   Namespace: {}", decoded.namespace);
        println!("   Event: {}", decoded.event);
        println!("   Wants ack: {} (id {})", decoded.wants_ack(), decoded.msg_id());
        println!("   Payload: {:?}", decoded.payload.as_str());
    }

    // 3. The matching ack
    println!("\n3. Replying with an ACK...");
    let ack = Packet::ack("/chat", 42, Payload::binary(vec![0xCAu8, 0xFE]));
    let decoded = Packet::decode(ack.encode()?)?;
    assert_eq!(decoded.typ(), PacketType::Ack);
    println!(
        "   Ack for {} carrying {} binary bytes",
        decoded.msg_id(),
        decoded.payload.len()
    );

    // 4. A refused connect
    println!("\n4. Handshake refusal...");
    let refused = Packet::decode(Packet::connect_error("/admin", "bad token").encode()?)?;
    println!("   {:?}: {:?}", refused.typ(), refused.reason);

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
