use tokio::sync::watch;

/// # Summary
/// 关闭信号的发送端，由进程入口持有。
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// # Summary
/// 关闭信号的接收端，可克隆后分发给调度循环与导入任务。
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// 发出关闭信号，重复调用无副作用
    pub fn trigger(&self) {
        self.tx.send_modify(|stopped| *stopped = true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// 永不触发的信号，用于一次性命令
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// # Summary
    /// 等待关闭信号。发送端已释放且未触发时永久挂起。
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
