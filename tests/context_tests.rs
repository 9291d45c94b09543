//! Loopback tests for the connection context

#[cfg(test)]
mod tests {
    use std::{
        alloc::Layout,
        io::{Read, Write},
        net::{SocketAddr, TcpStream as StdTcpStream},
        ptr::NonNull,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    };
    use tidewire::{
        Context, ContextConfig, Handle, Internal, MemoryHooks, Message, MessageId, NetError, SystemHooks,
    };

    const PATIENCE: Duration = Duration::from_secs(5);

    fn any_port() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn small_config() -> ContextConfig {
        ContextConfig::default()
            .with_max_connections(8)
            .with_incoming_buffer_size(4096)
    }

    /// Drive `ctx` until `done` holds or the patience runs out
    fn drive<F>(ctx: &mut Context, mut done: F) -> bool
    where
        F: FnMut(&mut Context) -> bool,
    {
        let deadline = Instant::now() + PATIENCE;
        while Instant::now() < deadline {
            if done(ctx) {
                return true;
            }
            ctx.update(Duration::from_millis(10)).unwrap();
        }
        done(ctx)
    }

    /// Collect inbound messages until `done` holds for the collection
    fn collect<F>(ctx: &mut Context, mut done: F) -> Vec<Message>
    where
        F: FnMut(&[Message]) -> bool,
    {
        let mut received = Vec::new();
        drive(ctx, |ctx| {
            while let Some(msg) = ctx.recv() {
                received.push(msg);
            }
            done(&received)
        });
        received
    }

    /// Listener, client handle and server-side handle in one context
    fn connected_pair(ctx: &mut Context, raw: bool) -> (Handle, Handle, Handle) {
        let listen = ctx.listen(any_port(), raw, None).unwrap();
        let addr = ctx.local_addr(listen).unwrap();
        let client = ctx.connect(addr, raw, false).unwrap();
        assert!(drive(ctx, |ctx| ctx.is_connected(client) && ctx.connections().len() == 2));

        let server = ctx.connections().into_iter().find(|h| *h != client).unwrap();
        (listen, client, server)
    }

    fn send(ctx: &mut Context, handle: Handle, payload: &[u8]) {
        let mut msg = ctx.alloc(handle, payload.len() as u16).unwrap();
        msg.data_mut().copy_from_slice(payload);
        ctx.send(msg).unwrap();
    }

    fn data_for(messages: &[Message], handle: Handle) -> Vec<Vec<u8>> {
        messages
            .iter()
            .filter(|msg| msg.handle() == handle && msg.internal() == Internal::None)
            .map(|msg| msg.data().to_vec())
            .collect()
    }

    fn disconnects_for(messages: &[Message], handle: Handle) -> usize {
        messages
            .iter()
            .filter(|msg| msg.handle() == handle && msg.internal() == Internal::Disconnect)
            .count()
    }

    #[test]
    fn test_framed_round_trip() {
        let mut ctx = Context::new(small_config()).unwrap();
        let (listen, client, server) = connected_pair(&mut ctx, false);
        assert_eq!(ctx.listener_of(server), Some(listen));
        assert_eq!(ctx.listener_of(client), None);

        send(&mut ctx, client, b"hello");
        send(&mut ctx, client, b"world");
        let received = collect(&mut ctx, |msgs| msgs.len() >= 2);
        assert_eq!(data_for(&received, server), vec![b"hello".to_vec(), b"world".to_vec()]);
        assert!(received.iter().all(|msg| msg.is_incoming()));

        send(&mut ctx, server, b"reply");
        let received = collect(&mut ctx, |msgs| !msgs.is_empty());
        assert_eq!(data_for(&received, client), vec![b"reply".to_vec()]);

        assert_eq!(ctx.stats().accepted, 1);
        assert_eq!(ctx.stats().connected, 1);
    }

    #[test]
    fn test_frames_across_ring_wrap() {
        let mut ctx = Context::new(small_config().with_incoming_buffer_size(1024)).unwrap();
        let (_, client, server) = connected_pair(&mut ctx, false);

        let frames: Vec<Vec<u8>> = (0..40u8).map(|i| vec![i; 700]).collect();
        for frame in &frames {
            send(&mut ctx, client, frame);
        }

        let received = collect(&mut ctx, |msgs| msgs.len() >= frames.len());
        assert_eq!(data_for(&received, server), frames);
    }

    #[test]
    fn test_raw_connection_delivers_chunks() {
        let mut ctx = Context::new(small_config()).unwrap();
        let (_, client, server) = connected_pair(&mut ctx, true);
        assert_eq!(ctx.is_raw(server), Some(true));

        send(&mut ctx, client, b"no length prefix");
        let received = collect(&mut ctx, |msgs| {
            msgs.iter().map(|msg| msg.len()).sum::<usize>() >= 16
        });
        assert_eq!(data_for(&received, server).concat(), b"no length prefix".to_vec());
    }

    #[test]
    fn test_wire_format_is_little_endian_length_prefix() {
        let mut ctx = Context::new(small_config()).unwrap();
        let listen = ctx.listen(any_port(), false, None).unwrap();
        let mut peer = StdTcpStream::connect(ctx.local_addr(listen).unwrap()).unwrap();
        peer.set_read_timeout(Some(PATIENCE)).unwrap();

        peer.write_all(&[5, 0, b'h', b'e', b'l', b'l', b'o']).unwrap();
        let received = collect(&mut ctx, |msgs| !msgs.is_empty());
        assert_eq!(received[0].data(), b"hello");

        let server = received[0].handle();
        send(&mut ctx, server, &[0xAB; 300]);
        let mut frame = vec![0u8; 302];
        peer.read_exact(&mut frame).unwrap();
        assert_eq!(&frame[..2], &[0x2C, 0x01]);
        assert!(frame[2..].iter().all(|b| *b == 0xAB));
    }

    #[test]
    fn test_peer_close_produces_one_lost_connection() {
        let mut ctx = Context::new(small_config()).unwrap();
        let (_, client, server) = connected_pair(&mut ctx, false);

        ctx.disconnect(client, false).unwrap();
        assert!(!ctx.is_connected(client));

        let mut received = collect(&mut ctx, |msgs| disconnects_for(msgs, server) > 0);
        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            ctx.update(Duration::from_millis(20)).unwrap();
            received.extend(std::iter::from_fn(|| ctx.recv()));
        }

        assert_eq!(disconnects_for(&received, client), 1);
        assert_eq!(disconnects_for(&received, server), 1);
        let lost = received
            .iter()
            .find(|msg| msg.handle() == server && msg.internal() == Internal::Disconnect)
            .unwrap();
        assert_eq!(lost.id(), Some(MessageId::LostConnection));
        assert!(ctx.connections().is_empty());
    }

    #[test]
    fn test_finishing_disconnect_flushes_queue() {
        let mut ctx = Context::new(small_config()).unwrap();
        let (_, client, server) = connected_pair(&mut ctx, false);

        for payload in [&b"one"[..], b"two", b"three"] {
            send(&mut ctx, client, payload);
        }
        ctx.disconnect(client, true).unwrap();

        let received = collect(&mut ctx, |msgs| disconnects_for(msgs, server) > 0);
        assert_eq!(
            data_for(&received, server),
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );

        let server_messages: Vec<&Message> = received.iter().filter(|m| m.handle() == server).collect();
        assert_eq!(server_messages.last().unwrap().internal(), Internal::Disconnect);
    }

    #[test]
    fn test_stale_handle_rejected() {
        let mut ctx = Context::new(small_config()).unwrap();
        let (_, client, _) = connected_pair(&mut ctx, false);

        let msg = ctx.alloc(client, 4).unwrap();
        ctx.disconnect(client, false).unwrap();

        assert!(matches!(ctx.send(msg), Err(NetError::StaleHandle { .. })));
        assert!(matches!(ctx.disconnect(client, false), Err(NetError::StaleHandle { .. })));
        assert!(ctx.notify(client, 1).is_err());
        assert_eq!(ctx.message_bytes(), 0);
    }

    #[test]
    fn test_notify_follows_queued_traffic() {
        let mut ctx = Context::new(small_config()).unwrap();
        let (_, client, server) = connected_pair(&mut ctx, false);

        send(&mut ctx, client, &[1; 1000]);
        ctx.notify(client, 77).unwrap();

        let received = collect(&mut ctx, |msgs| {
            msgs.iter().any(|m| m.internal() == Internal::Notify) && !data_for(msgs, server).is_empty()
        });
        let notify = received.iter().find(|m| m.internal() == Internal::Notify).unwrap();
        assert_eq!(notify.handle(), client);
        assert_eq!(notify.id(), Some(MessageId::Notify));
        assert_eq!(notify.data()[1..], 77u64.to_le_bytes());
        assert_eq!(ctx.queued(client), 0);
    }

    #[test]
    fn test_connect_refused_reports_connect_failed() {
        let addr = {
            let probe = std::net::TcpListener::bind(any_port()).unwrap();
            probe.local_addr().unwrap()
        };

        let mut ctx = Context::new(small_config()).unwrap();
        let client = match ctx.connect(addr, false, false) {
            Ok(handle) => handle,
            Err(err) => {
                assert!(err.is_terminal());
                return;
            }
        };

        let received = collect(&mut ctx, |msgs| disconnects_for(msgs, client) > 0);
        let failed = received.iter().find(|m| m.handle() == client).unwrap();
        assert_eq!(failed.internal(), Internal::Disconnect);
        assert_eq!(failed.id(), Some(MessageId::ConnectFailed));
        assert_eq!(ctx.stats().connect_failures, 1);
    }

    #[test]
    fn test_connect_timeout() {
        let config = small_config().with_connect_timeout(Duration::from_millis(200));
        let mut ctx = Context::new(config).unwrap();

        // Unroutable address: either refused at once or left hanging until the deadline
        let client = match ctx.connect("10.255.255.1:81".parse().unwrap(), false, false) {
            Ok(handle) => handle,
            Err(_) => return,
        };

        let started = Instant::now();
        let received = collect(&mut ctx, |msgs| disconnects_for(msgs, client) > 0);
        assert!(started.elapsed() < PATIENCE);
        assert_eq!(received.last().unwrap().id(), Some(MessageId::ConnectFailed));
        assert!(ctx.connections().is_empty());
    }

    #[test]
    fn test_accept_into_full_pool() {
        let mut ctx = Context::new(small_config().with_max_connections(1)).unwrap();
        let listen = ctx.listen(any_port(), false, None).unwrap();
        let addr = ctx.local_addr(listen).unwrap();

        let _first = StdTcpStream::connect(addr).unwrap();
        let _second = StdTcpStream::connect(addr).unwrap();

        let received = collect(&mut ctx, |msgs| msgs.iter().any(|m| m.internal() == Internal::Notify));
        let refused = received.iter().find(|m| m.internal() == Internal::Notify).unwrap();
        assert_eq!(refused.handle(), listen);
        assert_eq!(refused.id(), Some(MessageId::AcceptFailed));
        assert_eq!(ctx.connections().len(), 1);
        assert_eq!(ctx.stats().accept_failures, 1);
    }

    #[test]
    fn test_oversized_frame_drops_connection() {
        let mut ctx = Context::new(small_config().with_incoming_buffer_size(256)).unwrap();
        let listen = ctx.listen(any_port(), false, None).unwrap();
        let mut peer = StdTcpStream::connect(ctx.local_addr(listen).unwrap()).unwrap();

        peer.write_all(&[0xFF, 0x00]).unwrap();
        let received = collect(&mut ctx, |msgs| msgs.iter().any(|m| m.internal() == Internal::Disconnect));
        let lost = received.iter().find(|m| m.internal() == Internal::Disconnect).unwrap();
        assert_eq!(lost.id(), Some(MessageId::LostConnection));
    }

    #[test]
    fn test_exhausted_budget_delays_delivery() {
        // Room for one 8 byte payload at a time
        let config = small_config().with_incoming_buffer_size(16).with_message_budget(14);
        let mut ctx = Context::new(config).unwrap();
        let listen = ctx.listen(any_port(), false, None).unwrap();
        let mut peer = StdTcpStream::connect(ctx.local_addr(listen).unwrap()).unwrap();

        peer.write_all(&[8, 0, 1, 1, 1, 1, 1, 1, 1, 1]).unwrap();
        peer.write_all(&[8, 0, 2, 2, 2, 2, 2, 2, 2, 2]).unwrap();

        let first = collect(&mut ctx, |msgs| !msgs.is_empty());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].data(), &[1; 8]);

        // The first message still holds the whole budget
        for _ in 0..10 {
            ctx.update(Duration::from_millis(10)).unwrap();
        }
        assert!(ctx.recv().is_none());

        drop(first);
        let second = collect(&mut ctx, |msgs| !msgs.is_empty());
        assert_eq!(second[0].data(), &[2; 8]);
    }

    #[test]
    fn test_push_routes_by_direction() {
        let mut ctx = Context::new(small_config()).unwrap();
        let (_, client, server) = connected_pair(&mut ctx, false);

        let mut local = ctx.ctx_alloc(client, 3, true, Internal::None).unwrap();
        local.data_mut().copy_from_slice(b"own");
        ctx.ctx_push(local).unwrap();
        assert_eq!(ctx.recv().unwrap().data(), b"own");

        let mut outgoing = ctx.ctx_alloc(client, 3, false, Internal::None).unwrap();
        outgoing.data_mut().copy_from_slice(b"far");
        ctx.ctx_push(outgoing).unwrap();
        let received = collect(&mut ctx, |msgs| !msgs.is_empty());
        assert_eq!(data_for(&received, server), vec![b"far".to_vec()]);

        assert!(matches!(
            ctx.ctx_push_id(client, MessageId::User(2)),
            Err(NetError::InvalidParameter { .. })
        ));
        assert!(ctx.recv().is_none());

        ctx.ctx_push_id(client, MessageId::User(9)).unwrap();
        let notice = ctx.recv().unwrap();
        assert_eq!(notice.handle(), client);
        assert_eq!(notice.data(), &[9]);
    }

    #[test]
    fn test_framed_payload_must_fit_peer_ring() {
        let mut ctx = Context::new(small_config()).unwrap();
        let (_, client, _) = connected_pair(&mut ctx, false);
        let max = ctx.config().max_frame_payload();

        let msg = ctx.alloc(client, (max + 1) as u16).unwrap();
        assert!(matches!(ctx.send(msg), Err(NetError::InvalidParameter { .. })));
        assert_eq!(ctx.queued(client), 0);
        assert_eq!(ctx.message_bytes(), 0);

        let msg = ctx.alloc(client, max as u16).unwrap();
        ctx.send(msg).unwrap();
    }

    #[test]
    fn test_raw_payload_not_limited_by_ring() {
        let mut ctx = Context::new(small_config()).unwrap();
        let (_, client, server) = connected_pair(&mut ctx, true);
        let size = ctx.config().max_frame_payload() + 100;

        let mut msg = ctx.alloc(client, size as u16).unwrap();
        msg.data_mut().fill(7);
        ctx.send(msg).unwrap();

        let received = collect(&mut ctx, |msgs| data_for(msgs, server).concat().len() >= size);
        assert!(data_for(&received, server).concat().iter().all(|b| *b == 7));
    }

    #[test]
    fn test_budget_below_frame_limit_rejected() {
        let config = small_config().with_message_budget(8);
        assert!(matches!(Context::new(config), Err(NetError::InvalidParameter { .. })));
    }

    /// Global allocator hooks that count the blocks passing through
    #[derive(Debug, Default)]
    struct CountingHooks {
        allocs: AtomicUsize,
        frees: AtomicUsize,
    }

    impl MemoryHooks for CountingHooks {
        fn realloc(&self, ptr: Option<NonNull<u8>>, old: Option<Layout>, new: Layout) -> Option<NonNull<u8>> {
            self.allocs.fetch_add(1, Ordering::Relaxed);
            SystemHooks.realloc(ptr, old, new)
        }

        fn free(&self, ptr: NonNull<u8>, layout: Layout) {
            self.frees.fetch_add(1, Ordering::Relaxed);
            SystemHooks.free(ptr, layout)
        }
    }

    #[test]
    fn test_message_bodies_use_context_hooks() {
        let hooks = Arc::new(CountingHooks::default());
        let mut ctx = Context::with_hooks(small_config(), hooks.clone()).unwrap();
        let before = hooks.allocs.load(Ordering::Relaxed);

        let messages: Vec<Message> = (0..10)
            .map(|_| ctx.ctx_alloc(Handle::default(), 1000, false, Internal::None).unwrap())
            .collect();
        assert_eq!(hooks.allocs.load(Ordering::Relaxed), before + 10);

        let frees = hooks.frees.load(Ordering::Relaxed);
        drop(messages);
        assert_eq!(hooks.frees.load(Ordering::Relaxed), frees + 10);
        assert_eq!(ctx.message_bytes(), 0);

        ctx.ctx_push_id(Handle::default(), MessageId::User(5)).unwrap();
        assert_eq!(hooks.allocs.load(Ordering::Relaxed), before + 11);
        drop(ctx.recv());
        assert_eq!(hooks.frees.load(Ordering::Relaxed), frees + 11);
    }

    #[test]
    fn test_stop_listener() {
        let mut ctx = Context::new(small_config()).unwrap();
        let listen = ctx.listen(any_port(), false, None).unwrap();
        ctx.stop(listen).unwrap();
        assert!(ctx.local_addr(listen).is_err());
        assert!(ctx.stop(listen).is_err());
    }

    #[test]
    fn test_client_only_context_cannot_listen() {
        let mut ctx = Context::new(small_config().with_max_listen_sockets(0)).unwrap();
        assert!(matches!(ctx.listen(any_port(), false, None), Err(NetError::Exhausted { .. })));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ContextConfig::default().with_incoming_buffer_size(1000);
        assert!(matches!(Context::new(config), Err(NetError::InvalidParameter { .. })));
    }
}
