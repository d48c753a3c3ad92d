//! Ancillary-data plumbing for local sockets: peer credentials and
//! `SCM_RIGHTS` file-descriptor passing.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;

/// Credentials of the process on the other end of a Unix socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCreds {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// Queries `SO_PEERCRED` on a connected Unix socket.
pub fn peer_creds(fd: RawFd) -> io::Result<PeerCreds> {
    let mut ucred = libc::ucred {
        pid: 0,
        uid: 0,
        gid: 0,
    };
    let mut len = mem::size_of::<libc::ucred>() as libc::socklen_t;

    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&mut ucred as *mut libc::ucred).cast(),
            &mut len,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(PeerCreds {
        pid: ucred.pid,
        uid: ucred.uid,
        gid: ucred.gid,
    })
}

const MAX_ANCIL_FDS: usize = 4;

/// Writes `buf` to the socket, attaching `fds` as `SCM_RIGHTS` ancillary
/// data. The descriptors ride along with the first byte that is accepted.
pub fn send_with_fds(fd: RawFd, buf: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    assert!(fds.len() <= MAX_ANCIL_FDS);

    let mut iov = libc::iovec {
        iov_base: buf.as_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let space = unsafe { libc::CMSG_SPACE((fds.len() * mem::size_of::<RawFd>()) as u32) } as usize;
    let mut cmsg_buf = vec![0u8; space];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = space;

    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN((fds.len() * mem::size_of::<RawFd>()) as u32) as _;
        std::ptr::copy_nonoverlapping(
            fds.as_ptr(),
            libc::CMSG_DATA(cmsg).cast::<RawFd>(),
            fds.len(),
        );
    }

    let n = unsafe { libc::sendmsg(fd, &msg, libc::MSG_NOSIGNAL) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(n as usize)
}

/// Reads from the socket into `buf`, collecting any `SCM_RIGHTS`
/// descriptors that arrive with the data into `fds_out`.
pub fn recv_with_fds(fd: RawFd, buf: &mut [u8], fds_out: &mut Vec<RawFd>) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };

    let space = unsafe { libc::CMSG_SPACE((MAX_ANCIL_FDS * mem::size_of::<RawFd>()) as u32) } as usize;
    let mut cmsg_buf = vec![0u8; space];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = space;

    let n = unsafe { libc::recvmsg(fd, &mut msg, libc::MSG_CMSG_CLOEXEC) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let payload_len =
                    (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                let count = payload_len / mem::size_of::<RawFd>();
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                for i in 0..count {
                    fds_out.push(*data.add(i));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn peer_creds_are_our_own() -> anyhow::Result<()> {
        let (a, _b) = UnixStream::pair()?;
        let creds = peer_creds(a.as_raw_fd())?;

        assert_eq!(creds.pid, std::process::id() as i32);
        assert_eq!(creds.uid, unsafe { libc::getuid() });

        Ok(())
    }

    #[test]
    fn fds_ride_along() -> anyhow::Result<()> {
        let (a, b) = UnixStream::pair()?;
        let (mut r, w) = UnixStream::pair()?;

        send_with_fds(a.as_raw_fd(), b"x", &[w.as_raw_fd()])?;
        drop(w);

        let mut buf = [0u8; 16];
        let mut fds = Vec::new();
        let n = recv_with_fds(b.as_raw_fd(), &mut buf, &mut fds)?;

        assert_eq!(&buf[..n], b"x");
        assert_eq!(fds.len(), 1);

        // The received descriptor is a live copy of the sender's pipe end.
        let mut received: UnixStream = unsafe {
            use std::os::unix::io::FromRawFd;
            UnixStream::from_raw_fd(fds[0])
        };
        received.write_all(b"hello")?;
        drop(received);

        let mut got = String::new();
        r.read_to_string(&mut got)?;
        assert_eq!(got, "hello");

        Ok(())
    }
}
