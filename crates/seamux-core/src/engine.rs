//! The fan-out engine
//!
//! One task sits between the central queue and the outputs. It takes
//! one sentence at a time and copies it onto every eligible output
//! queue before looking at the next one, so the per-output order is
//! exactly the central queue order. When the central queue reaches
//! end-of-stream (the last input has gone), the engine closes every
//! output queue and exits; that single closure wave is how shutdown
//! reaches the output tier.

use std::sync::Arc;

use tracing::debug;

use crate::router::Router;

/// Run the fan-out loop until the central queue ends.
pub async fn run(router: Arc<Router>) {
    debug!("engine running");
    let central = router.central();
    loop {
        let blk = central.next().await;
        router.fan_out(blk.as_ref());
        if blk.is_none() {
            break;
        }
    }
    debug!("engine stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::endpoint::{Direction, EndpointKind};
    use crate::router::Registration;

    fn reg(name: &str, direction: Direction) -> Registration {
        Registration {
            name: name.into(),
            kind: EndpointKind::File,
            direction,
            qsize: 8,
        }
    }

    #[tokio::test]
    async fn copies_each_sentence_to_every_output() {
        let router = Router::new(8);
        let input = router.register(reg("in", Direction::In));
        let out_a = router.register(reg("a", Direction::Out));
        let out_b = router.register(reg("b", Direction::Out));
        input.handle.promote();
        out_a.handle.promote();
        out_b.handle.promote();

        let engine = tokio::spawn(run(router.clone()));

        input.handle.push(b"$ONE\r\n");
        input.handle.push(b"$TWO\r\n");

        for out in [&out_a, &out_b] {
            let first = out.handle.next().await.unwrap();
            let second = out.handle.next().await.unwrap();
            assert_eq!(first.bytes(), b"$ONE\r\n");
            assert_eq!(second.bytes(), b"$TWO\r\n");
        }

        // Last input leaving closes central, which the engine turns
        // into closure of every output queue.
        input.handle.unlink();
        tokio::time::timeout(Duration::from_secs(1), engine)
            .await
            .unwrap()
            .unwrap();
        assert!(out_a.handle.next().await.is_none());
        assert!(out_b.handle.next().await.is_none());
    }

    #[tokio::test]
    async fn does_not_reflect_into_paired_output() {
        let router = Router::new(8);
        let (pair_in, pair_out) = router.register_pair("pty:x".into(), EndpointKind::Pty, 8);
        let other_out = router.register(reg("other", Direction::Out));
        pair_in.handle.promote();
        pair_out.handle.promote();
        other_out.handle.promote();

        let engine = tokio::spawn(run(router.clone()));

        pair_in.handle.push(b"$FROM-PAIR\r\n");
        let got = tokio::time::timeout(Duration::from_secs(1), other_out.handle.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.bytes(), b"$FROM-PAIR\r\n");

        // The paired output must never see its own input's sentence.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pair_out.handle.queue().len(), 0);

        pair_in.handle.unlink();
        engine.await.unwrap();
    }

    #[tokio::test]
    async fn interleaves_inputs_in_push_order() {
        let router = Router::new(8);
        let in_a = router.register(reg("a", Direction::In));
        let in_b = router.register(reg("b", Direction::In));
        let out = router.register(reg("out", Direction::Out));
        in_a.handle.promote();
        in_b.handle.promote();
        out.handle.promote();

        let engine = tokio::spawn(run(router.clone()));

        in_a.handle.push(b"$A1\r\n");
        in_b.handle.push(b"$B1\r\n");
        in_a.handle.push(b"$A2\r\n");

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(out.handle.next().await.unwrap().bytes().to_vec());
        }
        assert_eq!(seen, vec![b"$A1\r\n".to_vec(), b"$B1\r\n".to_vec(), b"$A2\r\n".to_vec()]);

        in_a.handle.unlink();
        in_b.handle.unlink();
        engine.await.unwrap();
    }

    #[tokio::test]
    async fn sentences_have_src_of_their_producer() {
        let router = Router::new(8);
        let input = router.register(reg("in", Direction::In));
        let out = router.register(reg("out", Direction::Out));
        let in_id = input.handle.id();
        input.handle.promote();
        out.handle.promote();

        let engine = tokio::spawn(run(router.clone()));

        input.handle.push(b"$X\r\n");
        let got = out.handle.next().await.unwrap();
        assert_eq!(got.src(), in_id);

        input.handle.unlink();
        engine.await.unwrap();
    }
}
