//! A TCP echo server and a handful of client coroutines exercising the
//! `net` module end to end: `bind`/`listen`/`accept` on one coroutine per
//! connection, `recvn`/`send` on each side.
//!
//! `net` is POSIX-only, so this demo is a no-op on Windows.

#[cfg(unix)]
mod imp {
    use green_rt::Shutdown;
    use log::{info, warn};
    use std::net::SocketAddr;

    const ADDR: &str = "127.0.0.1:9988";
    const MSG_LEN: usize = 64;
    const CLIENTS: usize = 4;
    const ROUNDS: usize = 5;

    fn conn_fn(fd: i32) {
        let mut buf = [0u8; MSG_LEN];
        loop {
            match green_rt::recvn(fd, &mut buf, None) {
                Ok(0) => {
                    let _ = green_rt::close(fd, 0);
                    break;
                }
                Ok(_) => {
                    if green_rt::send(fd, &buf, None).is_err() {
                        let _ = green_rt::shutdown(fd, Shutdown::Both);
                        let _ = green_rt::close(fd, 0);
                        break;
                    }
                }
                Err(e) => {
                    warn!("recvn error: {e}");
                    let _ = green_rt::close(fd, 0);
                    break;
                }
            }
        }
    }

    fn server_fn(addr: SocketAddr) {
        let fd = green_rt::tcp_socket(libc::AF_INET).expect("socket");
        green_rt::set_reuseaddr(fd);
        green_rt::bind(fd, addr).expect("bind");
        green_rt::listen(fd, 128).expect("listen");
        info!("echo server listening on {addr}");

        loop {
            match green_rt::accept(fd) {
                Ok(connfd) => green_rt::go(move || conn_fn(connfd)),
                Err(e) => {
                    warn!("accept error: {e}");
                    break;
                }
            }
        }
    }

    fn client_fn(i: usize, addr: SocketAddr) {
        let fd = green_rt::tcp_socket(libc::AF_INET).expect("socket");
        if let Err(e) = green_rt::connect(fd, addr, Some(3000)) {
            warn!("client {i} connect failed: {e}");
            return;
        }

        let out = [b'x'; MSG_LEN];
        let mut back = [0u8; MSG_LEN];
        for round in 0..ROUNDS {
            if green_rt::send(fd, &out, None).is_err() {
                break;
            }
            match green_rt::recvn(fd, &mut back, None) {
                Ok(n) if n == MSG_LEN => info!("client {i} round {round} ok"),
                Ok(n) => {
                    warn!("client {i} short read: {n}");
                    break;
                }
                Err(e) => {
                    warn!("client {i} recvn error: {e}");
                    break;
                }
            }
        }
        let _ = green_rt::close(fd, 0);
    }

    pub fn main() {
        env_logger::init();

        let addr: SocketAddr = ADDR.parse().unwrap();
        green_rt::go(move || server_fn(addr));
        green_rt::sleep(100);

        for i in 0..CLIENTS {
            green_rt::go(move || client_fn(i, addr));
        }

        std::thread::sleep(std::time::Duration::from_millis(1500));
    }
}

#[cfg(unix)]
fn main() {
    imp::main();
}

#[cfg(not(unix))]
fn main() {
    eprintln!("the echo demo needs the POSIX `net` module; unsupported on this platform");
}
