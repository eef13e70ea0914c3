use serde::de::DeserializeOwned;
use serde::Serialize;
use tether_core::{PeerId, ServiceId};
use tether_fabric::Codec;
use tokio::sync::mpsc;

use crate::call::Call;
use crate::client::{assert_capacity, Client};
use crate::context::Context;
use crate::error::RpcError;

impl<C> Client<C>
where
    C: Codec + Clone + 'static,
{
    /// Call the same method with the same arguments on several peers at once
    ///
    /// `ctxs[i]` and `replies[i]` belong to the call to `dests[i]`, whose
    /// outcome is at index `i` of the result. Returns once every call is
    /// done.
    ///
    /// # Panics
    ///
    /// Panics before dispatching anything if the lengths differ or if any
    /// destination is remote while the client has no host or protocol.
    pub async fn multi_call<A, R>(
        &self,
        ctxs: Vec<Context>,
        dests: Vec<PeerId>,
        name: &str,
        method: &str,
        args: A,
        replies: &mut [R],
    ) -> Vec<Result<(), RpcError>>
    where
        A: Serialize + Clone + Send + Sync + 'static,
        R: DeserializeOwned + Default + Send + 'static,
    {
        if !matching_lengths(&[ctxs.len(), dests.len(), replies.len()]) {
            panic!("ctxs, dests and replies must match in length");
        }
        for dest in &dests {
            self.route(dest);
        }

        let calls = ctxs
            .into_iter()
            .zip(dests)
            .zip(replies.iter_mut())
            .map(|((ctx, dest), reply)| self.call(ctx, dest, name, method, args.clone(), reply));

        futures::future::join_all(calls).await
    }

    /// Start the same call on several peers without waiting
    ///
    /// The call to `dests[i]` uses `ctxs[i]`, starts from `replies[i]` and is
    /// sent on `dones[i]` when complete.
    ///
    /// # Panics
    ///
    /// Panics before dispatching anything if the lengths differ, if any
    /// channel in `dones` has no free capacity, or if any destination is
    /// remote while the client has no host or protocol.
    #[allow(clippy::too_many_arguments)]
    pub fn multi_go<A, R>(
        &self,
        ctxs: Vec<Context>,
        dests: Vec<PeerId>,
        name: &str,
        method: &str,
        args: A,
        replies: Vec<R>,
        dones: Vec<mpsc::Sender<Call<A, R>>>,
    ) where
        A: Serialize + Clone + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        if !matching_lengths(&[ctxs.len(), dests.len(), replies.len(), dones.len()]) {
            panic!("ctxs, dests, replies and dones must match in length");
        }
        dones.iter().for_each(assert_capacity);
        for dest in &dests {
            self.route(dest);
        }

        let service = ServiceId::new(name, method);
        for (((ctx, dest), reply), done) in ctxs.into_iter().zip(dests).zip(replies).zip(dones) {
            self.start(Call::new(ctx, dest, service.clone(), args.clone(), reply, done));
        }
    }
}

fn matching_lengths(lens: &[usize]) -> bool {
    lens.windows(2).all(|pair| pair[0] == pair[1])
}
