use std::net::SocketAddr;
use std::time::Duration;

use fugue_osc::{
    Arg, CancellationToken, Command, ControlListener, INDICATOR_DEV, Message, Target, Telemetry,
    TelemetryError, Uplink,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn start_listener() -> (
    SocketAddr,
    mpsc::Receiver<fugue_osc::Inbound>,
    CancellationToken,
    tokio::task::JoinHandle<Result<(), fugue_osc::ListenerError>>,
) {
    let listener = ControlListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(listener.serve(tx, cancel.clone()));
    (addr, rx, cancel, handle)
}

async fn send(to: SocketAddr, message: Message) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(&message.encode().unwrap(), to).await.unwrap();
}

#[tokio::test]
async fn routes_commands_to_consumer() {
    let (addr, mut rx, cancel, handle) = start_listener().await;

    send(addr, Message::new("/start_stream")).await;
    send(addr, Message::new("/EC:47:49:CF:53:C4/stop_stream")).await;

    let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.target, Target::All);
    assert_eq!(first.command, Command::StartStream);

    let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        second.target,
        Target::Device("EC:47:49:CF:53:C4".parse().unwrap())
    );
    assert_eq!(second.command, Command::StopStream);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn discards_unknown_topics_and_garbage() {
    let (addr, mut rx, cancel, handle) = start_listener().await;

    send(addr, Message::new("/dance")).await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(b"garbage", addr).await.unwrap();
    send(addr, Message::new("/ready")).await;

    let inbound = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(inbound.command, Command::Ready);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_server_cancels_token() {
    let (addr, _rx, cancel, handle) = start_listener().await;

    send(addr, Message::new("/stop_server")).await;

    timeout(Duration::from_secs(2), cancel.cancelled())
        .await
        .unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancellation_stops_idle_listener() {
    let (_addr, _rx, cancel, handle) = start_listener().await;

    cancel.cancel();

    timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn uplink_delivers_queued_messages() {
    let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let uplink = Uplink::bind(collector.local_addr().unwrap()).await.unwrap();
    let (telemetry, rx) = Telemetry::channel(8);
    let handle = tokio::spawn(uplink.run(rx));

    telemetry
        .send(Message::floats("/EC:47:49:CF:53:C4/acc", &[0.1, 0.2, 9.8]))
        .unwrap();
    telemetry.notify(INDICATOR_DEV, 1).unwrap();
    drop(telemetry);

    let mut buf = [0u8; 1024];
    let len = timeout(Duration::from_secs(2), collector.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let acc = Message::decode(&buf[..len]).unwrap();
    assert_eq!(acc[0].topic, "/EC:47:49:CF:53:C4/acc");
    assert_eq!(
        acc[0].args,
        vec![Arg::Float(0.1), Arg::Float(0.2), Arg::Float(9.8)]
    );

    let len = timeout(Duration::from_secs(2), collector.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let dev = Message::decode(&buf[..len]).unwrap();
    assert_eq!(dev[0], Message::int(INDICATOR_DEV, 1));

    assert_eq!(handle.await.unwrap(), 2);
}

#[tokio::test]
async fn full_queue_is_reported() {
    let (telemetry, _rx) = Telemetry::channel(1);

    telemetry.notify(INDICATOR_DEV, 1).unwrap();
    assert_eq!(telemetry.notify(INDICATOR_DEV, 0), Err(TelemetryError::Full));
}
