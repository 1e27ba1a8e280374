use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use tablechain::{
    networking::{Message, Network},
    types::basic::PeerAddr,
};

/// A mock network stub which passes messages from and to threads using channels.
///
/// Every stub can reach every other stub created by the same call to [`mock_network`], but only
/// broadcasts to the peers it has registered, like a real networking provider.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_addr: PeerAddr,
    all_peers: HashMap<PeerAddr, Sender<(PeerAddr, Message)>>,
    registered: Arc<Mutex<BTreeSet<PeerAddr>>>,
    inbox: Arc<Mutex<Receiver<(PeerAddr, Message)>>>,
}

impl Network for NetworkStub {
    fn local_addr(&self) -> PeerAddr {
        self.my_addr.clone()
    }

    fn register_peer(&mut self, peer: PeerAddr) -> bool {
        if peer == self.my_addr {
            return false;
        }
        self.registered.lock().unwrap().insert(peer)
    }

    fn peers(&self) -> Vec<PeerAddr> {
        self.registered.lock().unwrap().iter().cloned().collect()
    }

    fn send(&mut self, peer: PeerAddr, message: Message) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.my_addr.clone(), message));
        }
    }

    fn broadcast(&mut self, message: Message) {
        for peer in self.peers() {
            self.send(peer, message.clone());
        }
    }

    fn recv(&mut self) -> Option<(PeerAddr, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = PeerAddr>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(PeerAddr, Receiver<(PeerAddr, Message)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer.clone(), sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_addr, inbox)| NetworkStub {
            my_addr,
            all_peers: all_peers.clone(),
            registered: Arc::new(Mutex::new(BTreeSet::new())),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}

/// `count` made-up addresses, `replica-0:7000`, `replica-1:7001`, and so on.
pub(crate) fn mock_addrs(count: u16) -> Vec<PeerAddr> {
    (0..count)
        .map(|i| PeerAddr::new(format!("replica-{}", i), 7000 + i))
        .collect()
}
